//! Persisted webhook events and the append-only delivery ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::EventName;
use super::ids::{DeliveryId, EndpointId, EventId, LineageId};

/// One row per domain occurrence, regardless of subscriber count.
/// Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: EventId,
    pub name: EventName,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

/// Classification of a failed attempt. Recorded for operators; the retry
/// policy treats every class the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    Connection,
    HttpStatus,
    Other,
}

/// One delivery attempt.
///
/// Rows are inserted as `Pending` right before the request goes out and
/// finalised exactly once afterwards. Retries add rows with the next attempt
/// number on the same `lineage_id`; a replay starts a new lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub endpoint_id: EndpointId,
    pub event_id: EventId,
    pub lineage_id: LineageId,
    pub event_name: String,
    pub attempt: u32,
    pub status: DeliveryStatus,
    pub status_code: Option<u16>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub response_body: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    pub fn pending(
        id: DeliveryId,
        endpoint_id: EndpointId,
        event_id: EventId,
        lineage_id: LineageId,
        event_name: impl Into<String>,
        attempt: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            endpoint_id,
            event_id,
            lineage_id,
            event_name: event_name.into(),
            attempt,
            status: DeliveryStatus::Pending,
            status_code: None,
            duration_ms: None,
            error: None,
            error_class: None,
            response_body: None,
            next_retry_at: None,
            created_at,
            completed_at: None,
        }
    }

    pub fn finish(&mut self, outcome: AttemptOutcome, at: DateTime<Utc>) {
        self.status = if outcome.success {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Failed
        };
        self.status_code = outcome.status_code;
        self.duration_ms = Some(outcome.duration_ms);
        self.error = outcome.error;
        self.error_class = outcome.error_class;
        self.response_body = outcome.response_body;
        self.next_retry_at = outcome.next_retry_at;
        self.completed_at = Some(at);
    }
}

/// What happened on the wire for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub response_body: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Listing parameters for `get_deliveries`. Results are newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryQuery {
    #[serde(default)]
    pub status: Option<DeliveryStatus>,
    #[serde(default = "DeliveryQuery::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl DeliveryQuery {
    pub const MAX_LIMIT: usize = 100;

    fn default_limit() -> usize {
        50
    }
}

impl Default for DeliveryQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: Self::default_limit(),
            offset: 0,
        }
    }
}
