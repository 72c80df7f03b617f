//! Event fan-out: one stored event, one delivery job per subscriber.

use std::sync::Arc;

use async_trait::async_trait;

use super::executor::DeliverWebhook;
use crate::app::JobQueue;
use crate::domain::{
    DomainEvent, EndpointId, EventId, EventName, JobId, LineageId, WebhookError, WebhookEvent,
};
use crate::ports::{Clock, EventBus, EventListener, IdGenerator, WebhookRepository};
use crate::queue::JobOptions;

/// Result of fanning out one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    pub event_id: EventId,
    pub enqueued: Vec<(EndpointId, JobId)>,
    /// Endpoints whose job could not be queued, with the reason.
    pub failed: Vec<(EndpointId, String)>,
}

pub struct EventDispatcher {
    repo: Arc<dyn WebhookRepository>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    job_options: JobOptions,
}

impl EventDispatcher {
    pub fn new(
        repo: Arc<dyn WebhookRepository>,
        queue: JobQueue,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            repo,
            queue,
            clock,
            ids,
            job_options: JobOptions::default(),
        }
    }

    /// Options applied to every delivery job. Attempts and backoff left
    /// unset fall back to the queue defaults.
    pub fn with_job_options(mut self, options: JobOptions) -> Self {
        self.job_options = options;
        self
    }

    /// Persist the event and queue a delivery for every enabled subscriber.
    ///
    /// Returns once the jobs are queued; nothing here waits for HTTP. A
    /// failure to queue one endpoint is logged and reported, the rest still
    /// get their job.
    pub async fn handle_event(
        &self,
        name: EventName,
        payload: serde_json::Value,
    ) -> Result<FanOutReport, WebhookError> {
        let event = WebhookEvent {
            id: self.ids.event_id(),
            name,
            payload,
            created_at: self.clock.now(),
        };
        self.repo.insert_event(event.clone()).await?;

        let subscribers = self.repo.find_subscribers(name).await?;
        let mut report = FanOutReport {
            event_id: event.id,
            enqueued: Vec::with_capacity(subscribers.len()),
            failed: Vec::new(),
        };

        for endpoint in subscribers {
            match self.enqueue_delivery(endpoint.id, event.id, self.ids.lineage_id()).await {
                Ok(job_id) => report.enqueued.push((endpoint.id, job_id)),
                Err(e) => {
                    tracing::error!(
                        endpoint_id = %endpoint.id,
                        event_id = %event.id,
                        error = %e,
                        "failed to enqueue webhook delivery"
                    );
                    report.failed.push((endpoint.id, e.to_string()));
                }
            }
        }

        tracing::info!(
            event = %name,
            event_id = %event.id,
            enqueued = report.enqueued.len(),
            failed = report.failed.len(),
            "event fanned out"
        );
        Ok(report)
    }

    /// Manual entry point taking the wire name, bypassing the event bus.
    pub async fn trigger(&self, name: &str, payload: serde_json::Value) -> Result<FanOutReport, WebhookError> {
        let name: EventName = name.parse()?;
        self.handle_event(name, payload).await
    }

    pub async fn dispatch(&self, event: &DomainEvent) -> Result<FanOutReport, WebhookError> {
        self.handle_event(event.name(), event.payload()?).await
    }

    /// Queue one delivery lineage. The lineage id doubles as the dedupe key.
    pub async fn enqueue_delivery(
        &self,
        endpoint_id: EndpointId,
        event_id: EventId,
        lineage_id: LineageId,
    ) -> Result<JobId, WebhookError> {
        let job = DeliverWebhook {
            endpoint_id,
            event_id,
            lineage_id,
        };
        let options = self.job_options.clone().with_dedupe_key(lineage_id.to_string());
        Ok(self.queue.add(&job, options).await?)
    }

    /// Listen for every catalog event on `bus`.
    pub fn subscribe(self: &Arc<Self>, bus: &dyn EventBus) {
        for name in EventName::ALL {
            bus.on(name, Arc::clone(self) as Arc<dyn EventListener>);
        }
    }
}

#[async_trait]
impl EventListener for EventDispatcher {
    async fn on_event(&self, event: &DomainEvent) -> Result<(), WebhookError> {
        self.dispatch(event).await.map(|_| ())
    }
}
