//! Errors - error types shared across layers.
//!
//! - `QueueError`: job store / queue infrastructure
//! - `HandlerError`: a job handler's failure report (retryable or permanent)
//! - `RepoError`: durable webhook storage
//! - `WebhookError`: management-operation taxonomy surfaced to callers

use thiserror::Error;

use super::ids::{DeliveryId, EndpointId, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEventName(pub String);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue '{0}' has not been created")]
    UnknownQueue(String),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} is active and cannot be removed")]
    JobActive(JobId),

    #[error("lease on job {0} is no longer held by this worker")]
    LeaseLost(JobId),

    #[error("invalid job options: {0}")]
    InvalidOptions(String),

    #[error("payload encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

/// How a handler failed.
///
/// Retryable failures go through the queue's backoff; permanent ones move the
/// job straight to `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub retryable: bool,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("record not found")]
    NotFound,

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned synchronously by management operations.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    UnknownEvent(#[from] UnknownEventName),

    #[error("an endpoint for this URL already exists")]
    DuplicateEndpoint,

    #[error("endpoint {0} not found")]
    EndpointNotFound(EndpointId),

    #[error("delivery {0} not found")]
    DeliveryNotFound(DeliveryId),

    #[error("delivery {0} is not backed by a stored event and cannot be replayed")]
    NotReplayable(DeliveryId),

    #[error("storage error: {0}")]
    Storage(#[from] RepoError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for WebhookError {
    fn from(e: serde_json::Error) -> Self {
        WebhookError::Internal(format!("json: {e}"))
    }
}
