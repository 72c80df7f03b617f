//! Delivery executor: one signed POST per attempt, one ledger row per POST.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::signature;
use super::stats::StatsAggregator;
use crate::domain::{
    AttemptOutcome, DeliveryStatus, EndpointId, ErrorClass, EventId, HandlerError, LineageId,
    WebhookDelivery, WebhookEndpoint, WebhookError,
};
use crate::ports::{Clock, IdGenerator, OutboundRequest, TransportError, WebhookRepository, WebhookTransport};
use crate::queue::Backoff;
use crate::typed::{Handler, Job, JobContext};

pub const HEADER_ID: &str = "X-Webhook-Id";
pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_DELIVERY: &str = "X-Webhook-Delivery";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";

/// Error recorded on a row whose worker died before finishing it.
pub const STALLED_ATTEMPT_ERROR: &str = "worker stalled";

/// Event name of synthetic test deliveries.
pub const TEST_EVENT: &str = "webhook.test";

/// Queue job: deliver one stored event to one endpoint. Every retry of the
/// job belongs to the same lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverWebhook {
    pub endpoint_id: EndpointId,
    pub event_id: EventId,
    pub lineage_id: LineageId,
}

impl Job for DeliverWebhook {
    const QUEUE: &'static str = "webhooks";
    const TYPE: &'static str = "webhook.deliver";
}

/// Wire body of a delivery. Field order is fixed; `data` objects serialize
/// with sorted keys.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub id: String,
    pub event: &'a str,
    pub data: &'a serde_json::Value,
    pub timestamp: String,
}

/// What gets delivered: a stored event or a synthetic test event.
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub event_id: EventId,
    pub event_name: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub timeout: Duration,
    /// Response bytes kept on the ledger row.
    pub stored_response_bytes: usize,
    pub backoff: Backoff,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            stored_response_bytes: 1024,
            backoff: Backoff::table([
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ]),
        }
    }
}

/// Cut `s` to at most `max` bytes on a char boundary.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Request body and headers for one attempt.
pub fn build_request(
    endpoint: &WebhookEndpoint,
    occurrence: &Occurrence,
    delivery_id: &str,
    timeout: Duration,
) -> Result<OutboundRequest, WebhookError> {
    let timestamp = occurrence.created_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let envelope = Envelope {
        id: occurrence.event_id.to_string(),
        event: &occurrence.event_name,
        data: &occurrence.payload,
        timestamp: timestamp.clone(),
    };
    let body = serde_json::to_vec(&envelope)?;
    let signature = signature::signature_header(endpoint.secret.expose(), &body)
        .map_err(|e| WebhookError::Internal(e.to_string()))?;

    let mut headers = vec![
        (HEADER_ID.to_string(), envelope.id.clone()),
        (HEADER_EVENT.to_string(), occurrence.event_name.clone()),
        (HEADER_DELIVERY.to_string(), delivery_id.to_string()),
        (HEADER_TIMESTAMP.to_string(), timestamp),
        (HEADER_SIGNATURE.to_string(), signature),
    ];
    headers.extend(endpoint.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(OutboundRequest {
        url: endpoint.url.clone(),
        headers,
        body,
        timeout,
    })
}

pub struct DeliveryExecutor {
    repo: Arc<dyn WebhookRepository>,
    transport: Arc<dyn WebhookTransport>,
    stats: Arc<StatsAggregator>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: ExecutorSettings,
}

impl DeliveryExecutor {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        transport: Arc<dyn WebhookTransport>,
        stats: Arc<StatsAggregator>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            repo,
            transport,
            stats,
            clock,
            ids,
            settings,
        }
    }

    /// Deliver a queued (endpoint, event) pair as attempt `attempt` of its
    /// lineage. `retry_after` is the backoff the queue will apply if this
    /// attempt fails, `None` on the last one.
    ///
    /// Returns the finalised ledger row, success or not. `Err` only for
    /// storage problems or a vanished endpoint/event.
    pub async fn process_delivery(
        &self,
        job: &DeliverWebhook,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Result<WebhookDelivery, WebhookError> {
        // Disabled endpoints still get what was already queued for them.
        let endpoint = self
            .repo
            .get_endpoint(job.endpoint_id)
            .await?
            .ok_or(WebhookError::EndpointNotFound(job.endpoint_id))?;
        let event = self
            .repo
            .get_event(job.event_id)
            .await?
            .ok_or_else(|| WebhookError::Internal(format!("event {} not found", job.event_id)))?;

        self.close_stalled_rows(job.lineage_id).await?;

        let occurrence = Occurrence {
            event_id: event.id,
            event_name: event.name.to_string(),
            payload: event.payload,
            created_at: event.created_at,
        };
        self.attempt(&endpoint, &occurrence, job.lineage_id, attempt, retry_after)
            .await
    }

    /// Attempts of a lineage never overlap, so a row still pending when the
    /// lineage runs again belongs to a worker that died mid-attempt.
    async fn close_stalled_rows(&self, lineage_id: LineageId) -> Result<(), WebhookError> {
        let rows = self.repo.list_lineage(lineage_id).await?;
        for mut row in rows.into_iter().filter(|r| r.status == DeliveryStatus::Pending) {
            let now = self.clock.now();
            let duration_ms = (now - row.created_at).num_milliseconds().max(0) as u64;
            row.finish(
                AttemptOutcome {
                    success: false,
                    status_code: None,
                    duration_ms,
                    error: Some(STALLED_ATTEMPT_ERROR.to_string()),
                    error_class: Some(ErrorClass::Other),
                    response_body: None,
                    next_retry_at: None,
                },
                now,
            );
            tracing::warn!(
                delivery_id = %row.id,
                lineage_id = %lineage_id,
                attempt = row.attempt,
                "closing delivery row left pending by a stalled worker"
            );
            self.repo.update_delivery(row).await?;
        }
        Ok(())
    }

    /// Synthetic `webhook.test` delivery, bypassing the queue. No event row
    /// is written; the attempt gets its own ledger row.
    pub async fn test_webhook(&self, endpoint: &WebhookEndpoint) -> Result<WebhookDelivery, WebhookError> {
        let now = self.clock.now();
        let occurrence = Occurrence {
            event_id: self.ids.event_id(),
            event_name: TEST_EVENT.to_string(),
            payload: serde_json::json!({
                "message": "This is a test webhook delivery",
                "endpoint_id": endpoint.id,
            }),
            created_at: now,
        };
        self.attempt(endpoint, &occurrence, self.ids.lineage_id(), 1, None).await
    }

    async fn attempt(
        &self,
        endpoint: &WebhookEndpoint,
        occurrence: &Occurrence,
        lineage_id: LineageId,
        attempt: u32,
        retry_after: Option<Duration>,
    ) -> Result<WebhookDelivery, WebhookError> {
        let mut row = WebhookDelivery::pending(
            self.ids.delivery_id(),
            endpoint.id,
            occurrence.event_id,
            lineage_id,
            occurrence.event_name.clone(),
            attempt,
            self.clock.now(),
        );
        self.repo.insert_delivery(row.clone()).await?;

        let request = build_request(endpoint, occurrence, &row.id.to_string(), self.settings.timeout)?;
        let started = Instant::now();
        let result = tokio::time::timeout(self.settings.timeout, self.transport.post(request)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut outcome = AttemptOutcome {
            success: false,
            status_code: None,
            duration_ms,
            error: None,
            error_class: None,
            response_body: None,
            next_retry_at: None,
        };
        match result {
            Ok(Ok(response)) => {
                outcome.success = response.is_success();
                outcome.status_code = Some(response.status);
                outcome.response_body =
                    Some(truncate_utf8(&response.body, self.settings.stored_response_bytes).to_string());
                if !outcome.success {
                    outcome.error = Some(format!("HTTP {}", response.status));
                    outcome.error_class = Some(ErrorClass::HttpStatus);
                }
            }
            Ok(Err(e)) => {
                outcome.error_class = Some(match e {
                    TransportError::Timeout(_) => ErrorClass::Timeout,
                    TransportError::Connect(_) => ErrorClass::Connection,
                    TransportError::Other(_) => ErrorClass::Other,
                });
                outcome.error = Some(e.to_string());
            }
            Err(_) => {
                outcome.error_class = Some(ErrorClass::Timeout);
                outcome.error = Some(TransportError::Timeout(self.settings.timeout).to_string());
            }
        }

        let finished_at = self.clock.now();
        if !outcome.success
            && let Some(delay) = retry_after
            && let Ok(delay) = chrono::Duration::from_std(delay)
        {
            outcome.next_retry_at = Some(finished_at + delay);
        }
        let success = outcome.success;
        row.finish(outcome, finished_at);
        self.repo.update_delivery(row.clone()).await?;

        if let Err(e) = self.stats.record(endpoint.id, success).await {
            tracing::warn!(endpoint_id = %endpoint.id, error = %e, "stats update failed");
        }

        if success {
            tracing::info!(
                endpoint_id = %endpoint.id,
                event_id = %occurrence.event_id,
                delivery_id = %row.id,
                attempt,
                status = row.status_code,
                duration_ms,
                "webhook delivered"
            );
        } else {
            tracing::warn!(
                endpoint_id = %endpoint.id,
                event_id = %occurrence.event_id,
                delivery_id = %row.id,
                attempt,
                status = row.status_code,
                error = row.error.as_deref().unwrap_or_default(),
                duration_ms,
                "webhook delivery failed"
            );
        }
        Ok(row)
    }
}

#[async_trait]
impl Handler<DeliverWebhook> for DeliveryExecutor {
    async fn handle(&self, job: DeliverWebhook, ctx: &JobContext) -> Result<(), HandlerError> {
        let retry_after = (!ctx.is_last_attempt()).then(|| self.settings.backoff.delay(ctx.attempt));

        match self.process_delivery(&job, ctx.attempt, retry_after).await {
            Ok(row) if row.status == DeliveryStatus::Success => Ok(()),
            Ok(row) => Err(HandlerError::retryable(
                row.error.unwrap_or_else(|| "delivery failed".to_string()),
            )),
            // Nothing left to deliver to.
            Err(e @ WebhookError::EndpointNotFound(_)) => Err(HandlerError::permanent(e.to_string())),
            Err(e) => Err(HandlerError::retryable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryId, EndpointSecret, EventName, JobId, OwnerId, WebhookEvent};
    use crate::impls::{InMemoryCounterStore, InMemoryWebhookRepository, RecordingTransport, Scripted};
    use crate::ports::{SystemClock, UlidGenerator};
    use std::collections::{BTreeMap, BTreeSet};

    const URL: &str = "https://receiver.test/hook";

    struct Fixture {
        repo: Arc<InMemoryWebhookRepository>,
        transport: Arc<RecordingTransport>,
        stats: Arc<StatsAggregator>,
        executor: DeliveryExecutor,
        endpoint: WebhookEndpoint,
        event: WebhookEvent,
    }

    async fn fixture() -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let repo = Arc::new(InMemoryWebhookRepository::new());
        let transport = Arc::new(RecordingTransport::new());
        let stats = Arc::new(StatsAggregator::new(
            Arc::new(InMemoryCounterStore::new()),
            repo.clone(),
            Duration::from_secs(86_400),
            10,
        ));
        let executor = DeliveryExecutor::new(
            repo.clone(),
            transport.clone(),
            Arc::clone(&stats),
            Arc::clone(&clock),
            ids,
            ExecutorSettings::default(),
        );

        let now = clock.now();
        let endpoint = WebhookEndpoint {
            id: EndpointId::generate(),
            owner_id: OwnerId::new("acme"),
            url: URL.into(),
            events: BTreeSet::from([EventName::UserCreated]),
            secret: EndpointSecret::new("whsec_test"),
            headers: BTreeMap::from([("X-Tenant".to_string(), "acme".to_string())]),
            enabled: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        repo.insert_endpoint(endpoint.clone()).await.unwrap();
        let event = WebhookEvent {
            id: EventId::generate(),
            name: EventName::UserCreated,
            payload: serde_json::json!({"id": "u1", "email": "u1@example.com"}),
            created_at: now,
        };
        repo.insert_event(event.clone()).await.unwrap();

        Fixture {
            repo,
            transport,
            stats,
            executor,
            endpoint,
            event,
        }
    }

    fn job(f: &Fixture, lineage_id: LineageId) -> DeliverWebhook {
        DeliverWebhook {
            endpoint_id: f.endpoint.id,
            event_id: f.event.id,
            lineage_id,
        }
    }

    fn ctx(attempt: u32) -> JobContext {
        JobContext {
            job_id: JobId::generate(),
            queue: DeliverWebhook::QUEUE.into(),
            attempt,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn successful_delivery_is_signed_and_recorded() {
        let f = fixture().await;
        let row = f.executor.process_delivery(&job(&f, LineageId::generate()), 1, None).await.unwrap();

        assert_eq!(row.status, DeliveryStatus::Success);
        assert_eq!(row.status_code, Some(200));
        assert_eq!(row.attempt, 1);
        assert_eq!(row.response_body.as_deref(), Some("ok"));
        assert!(row.completed_at.is_some());

        let sent = f.transport.requests().await;
        assert_eq!(sent.len(), 1);
        let request = &sent[0];
        let signature = request.header(HEADER_SIGNATURE).unwrap();
        assert!(signature::verify_header("whsec_test", &request.body, signature));
        assert_eq!(request.header(HEADER_EVENT), Some("user.created"));
        assert_eq!(request.header(HEADER_ID), Some(f.event.id.to_string().as_str()));
        assert_eq!(request.header(HEADER_DELIVERY), Some(row.id.to_string().as_str()));
        assert_eq!(request.header("X-Tenant"), Some("acme"));

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["event"], "user.created");
        assert_eq!(body["data"]["id"], "u1");
        assert_eq!(body["id"], f.event.id.to_string());
        assert_eq!(body["timestamp"], request.header(HEADER_TIMESTAMP).unwrap());

        assert_eq!(f.stats.get_stats(f.endpoint.id).await.unwrap().successful_deliveries, 1);
    }

    #[tokio::test]
    async fn non_2xx_is_recorded_with_next_retry() {
        let f = fixture().await;
        f.transport
            .script(URL, Scripted::Respond { status: 503, body: "x".repeat(5000) })
            .await;

        let row = f
            .executor
            .process_delivery(&job(&f, LineageId::generate()), 1, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(row.status, DeliveryStatus::Failed);
        assert_eq!(row.status_code, Some(503));
        assert_eq!(row.error_class, Some(ErrorClass::HttpStatus));
        assert_eq!(row.error.as_deref(), Some("HTTP 503"));
        assert_eq!(row.response_body.as_ref().map(String::len), Some(1024));
        let completed = row.completed_at.unwrap();
        assert_eq!(row.next_retry_at, Some(completed + chrono::Duration::seconds(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_endpoint_is_cut_off_as_timeout() {
        let f = fixture().await;
        f.transport.script(URL, Scripted::Hang).await;

        let row = f.executor.process_delivery(&job(&f, LineageId::generate()), 1, None).await.unwrap();
        assert_eq!(row.status, DeliveryStatus::Failed);
        assert_eq!(row.error_class, Some(ErrorClass::Timeout));
        assert!(row.status_code.is_none());
        assert!(row.next_retry_at.is_none());
        assert!(row.duration_ms.unwrap() >= 30_000);
    }

    #[tokio::test]
    async fn refused_connection_is_classified() {
        let f = fixture().await;
        f.transport.script(URL, Scripted::Refuse).await;
        let row = f.executor.process_delivery(&job(&f, LineageId::generate()), 1, None).await.unwrap();
        assert_eq!(row.error_class, Some(ErrorClass::Connection));
    }

    #[tokio::test]
    async fn ledger_attempts_follow_the_queue_attempt() {
        let f = fixture().await;
        f.transport.script(URL, Scripted::status(500)).await;
        let lineage = LineageId::generate();

        for attempt in 1..=3 {
            let err = f.executor.handle(job(&f, lineage), &ctx(attempt)).await.unwrap_err();
            assert!(err.retryable);
        }

        let rows = f.repo.list_lineage(lineage).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
        let waits: Vec<_> = rows
            .iter()
            .map(|r| r.next_retry_at.map(|at| at - r.completed_at.unwrap()))
            .collect();
        assert_eq!(
            waits,
            vec![Some(chrono::Duration::seconds(60)), Some(chrono::Duration::seconds(300)), None]
        );

        // A new lineage starts over.
        let row = f.executor.process_delivery(&job(&f, LineageId::generate()), 1, None).await.unwrap();
        assert_eq!(row.attempt, 1);
        assert_eq!(f.repo.deliveries().await.len(), 4);
    }

    #[tokio::test]
    async fn row_left_pending_by_a_crashed_worker_is_closed_on_the_next_attempt() {
        let f = fixture().await;
        f.transport.script(URL, Scripted::status(500)).await;
        let lineage = LineageId::generate();

        // Attempt 1 inserted its row, then the worker died before the POST finished.
        let orphan = WebhookDelivery::pending(
            DeliveryId::generate(),
            f.endpoint.id,
            f.event.id,
            lineage,
            "user.created",
            1,
            chrono::Utc::now(),
        );
        f.repo.insert_delivery(orphan.clone()).await.unwrap();

        for attempt in 2..=3 {
            f.executor.handle(job(&f, lineage), &ctx(attempt)).await.unwrap_err();
        }

        let rows = f.repo.list_lineage(lineage).await.unwrap();
        let summary: Vec<_> = rows.iter().map(|r| (r.attempt, r.status)).collect();
        assert_eq!(
            summary,
            vec![
                (1, DeliveryStatus::Failed),
                (2, DeliveryStatus::Failed),
                (3, DeliveryStatus::Failed),
            ]
        );
        assert!(rows.iter().all(|r| r.attempt <= 3));
        assert_eq!(rows[0].id, orphan.id);
        assert_eq!(rows[0].error.as_deref(), Some(STALLED_ATTEMPT_ERROR));
        assert!(rows[0].completed_at.is_some());
        assert_eq!(
            rows[1].next_retry_at.map(|at| at - rows[1].completed_at.unwrap()),
            Some(chrono::Duration::seconds(300))
        );
        assert!(rows[2].next_retry_at.is_none());
    }

    #[tokio::test]
    async fn handler_maps_outcomes_to_retry_policy() {
        let f = fixture().await;
        assert!(f.executor.handle(job(&f, LineageId::generate()), &ctx(1)).await.is_ok());

        f.transport.script(URL, Scripted::status(404)).await;
        let err = f.executor.handle(job(&f, LineageId::generate()), &ctx(1)).await.unwrap_err();
        assert!(err.retryable);

        let gone = DeliverWebhook {
            endpoint_id: EndpointId::generate(),
            ..job(&f, LineageId::generate())
        };
        let err = f.executor.handle(gone, &ctx(1)).await.unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn disabled_endpoint_still_receives_queued_delivery() {
        let f = fixture().await;
        let mut endpoint = f.endpoint.clone();
        endpoint.enabled = false;
        f.repo.update_endpoint(endpoint).await.unwrap();

        let row = f.executor.process_delivery(&job(&f, LineageId::generate()), 1, None).await.unwrap();
        assert_eq!(row.status, DeliveryStatus::Success);
    }

    #[tokio::test]
    async fn test_delivery_writes_a_row_but_no_event() {
        let f = fixture().await;
        let row = f.executor.test_webhook(&f.endpoint).await.unwrap();
        assert_eq!(row.event_name, TEST_EVENT);
        assert_eq!(row.status, DeliveryStatus::Success);
        assert!(f.repo.get_event(row.event_id).await.unwrap().is_none());
        assert_eq!(f.repo.events().await.len(), 1);

        let sent = f.transport.requests().await;
        assert_eq!(sent[0].header(HEADER_EVENT), Some(TEST_EVENT));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("hello", 3), "hel");
        assert_eq!(truncate_utf8("héllo", 2), "h");
    }
}
