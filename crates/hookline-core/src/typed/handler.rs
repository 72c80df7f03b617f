//! Processor traits.
//!
//! - `Handler<T>`: typed surface, one impl per job type
//! - `DynHandler`: object-safe form stored in the registry
//! - `TypedHandler<T, H>`: type erasure from the former to the latter

use std::marker::PhantomData;

use async_trait::async_trait;

use super::job::Job;
use crate::domain::{HandlerError, JobId};

/// What a processor knows about the attempt it is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue: String,
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl JobContext {
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Processes one job type.
///
/// Returning `Err` fails the attempt; a retryable error is rescheduled by the
/// queue's backoff until attempts run out.
#[async_trait]
pub trait Handler<T: Job>: Send + Sync {
    async fn handle(&self, job: T, ctx: &JobContext) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T: Job, H: Handler<T>> Handler<T> for std::sync::Arc<H> {
    async fn handle(&self, job: T, ctx: &JobContext) -> Result<(), HandlerError> {
        (**self).handle(job, ctx).await
    }
}

#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: serde_json::Value, ctx: &JobContext) -> Result<(), HandlerError>;
    fn queue(&self) -> &'static str;
    fn job_type(&self) -> &'static str;
}

pub struct TypedHandler<T: Job, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Job, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Job, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: serde_json::Value, ctx: &JobContext) -> Result<(), HandlerError> {
        // A payload that does not decode will not decode on retry either.
        let job: T = serde_json::from_value(payload)
            .map_err(|e| HandlerError::permanent(format!("payload decode: {e}")))?;
        self.handler.handle(job, ctx).await
    }

    fn queue(&self) -> &'static str {
        T::QUEUE
    }

    fn job_type(&self) -> &'static str {
        T::TYPE
    }
}
