//! Management operations, scoped by owner. Another owner's endpoint looks
//! exactly like a missing one.

use std::sync::Arc;

use serde::Serialize;

use super::dispatcher::EventDispatcher;
use super::executor::DeliveryExecutor;
use super::registry::EndpointRegistry;
use super::stats::{EndpointStats, StatsAggregator};
use crate::domain::{
    CreatedEndpoint, DeliveryId, DeliveryQuery, EndpointFilter, EndpointId, EndpointUpdate,
    EndpointView, JobId, LineageId, NewEndpoint, OwnerId, WebhookDelivery, WebhookError,
};
use crate::ports::{IdGenerator, WebhookRepository};

/// Handle on a queued replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReceipt {
    pub delivery_id: DeliveryId,
    pub lineage_id: LineageId,
    pub job_id: JobId,
}

pub struct WebhookService {
    registry: EndpointRegistry,
    repo: Arc<dyn WebhookRepository>,
    dispatcher: Arc<EventDispatcher>,
    executor: Arc<DeliveryExecutor>,
    stats: Arc<StatsAggregator>,
    ids: Arc<dyn IdGenerator>,
}

impl WebhookService {
    pub fn new(
        registry: EndpointRegistry,
        repo: Arc<dyn WebhookRepository>,
        dispatcher: Arc<EventDispatcher>,
        executor: Arc<DeliveryExecutor>,
        stats: Arc<StatsAggregator>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            registry,
            repo,
            dispatcher,
            executor,
            stats,
            ids,
        }
    }

    /// The returned secret is the only time it leaves the service.
    pub async fn create_webhook(&self, owner: &OwnerId, input: NewEndpoint) -> Result<CreatedEndpoint, WebhookError> {
        self.registry.create(owner, input).await
    }

    pub async fn list_webhooks(&self, owner: &OwnerId, filter: &EndpointFilter) -> Result<Vec<EndpointView>, WebhookError> {
        self.registry.list(owner, filter).await
    }

    pub async fn get_webhook(&self, owner: &OwnerId, id: EndpointId) -> Result<EndpointView, WebhookError> {
        let endpoint = self.registry.get(owner, id).await?;
        Ok(EndpointView::from(&endpoint))
    }

    pub async fn update_webhook(
        &self,
        owner: &OwnerId,
        id: EndpointId,
        update: EndpointUpdate,
    ) -> Result<EndpointView, WebhookError> {
        self.registry.update(owner, id, update).await
    }

    /// Soft delete. Jobs already queued for the endpoint fail without
    /// another POST.
    pub async fn delete_webhook(&self, owner: &OwnerId, id: EndpointId) -> Result<(), WebhookError> {
        self.registry.delete(owner, id).await
    }

    /// Synchronous `webhook.test` POST, works on disabled endpoints too.
    pub async fn test_webhook(&self, owner: &OwnerId, id: EndpointId) -> Result<WebhookDelivery, WebhookError> {
        let endpoint = self.registry.get(owner, id).await?;
        self.executor.test_webhook(&endpoint).await
    }

    pub async fn get_stats(&self, owner: &OwnerId, id: EndpointId) -> Result<EndpointStats, WebhookError> {
        self.registry.get(owner, id).await?;
        self.stats.get_stats(id).await
    }

    /// Ledger rows for one endpoint, newest first.
    pub async fn get_deliveries(
        &self,
        owner: &OwnerId,
        id: EndpointId,
        mut query: DeliveryQuery,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.registry.get(owner, id).await?;
        query.limit = query.limit.min(DeliveryQuery::MAX_LIMIT);
        Ok(self.repo.list_deliveries(id, &query).await?)
    }

    /// Queue the event behind `delivery_id` again as a fresh lineage
    /// starting at attempt 1. Existing rows are left alone.
    pub async fn replay_delivery(&self, owner: &OwnerId, delivery_id: DeliveryId) -> Result<ReplayReceipt, WebhookError> {
        let delivery = self
            .repo
            .get_delivery(delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound(delivery_id))?;
        let endpoint = self
            .registry
            .get(owner, delivery.endpoint_id)
            .await
            .map_err(|e| match e {
                WebhookError::EndpointNotFound(_) => WebhookError::DeliveryNotFound(delivery_id),
                other => other,
            })?;

        // Test deliveries have no stored event behind them.
        if self.repo.get_event(delivery.event_id).await?.is_none() {
            return Err(WebhookError::NotReplayable(delivery_id));
        }

        let lineage_id = self.ids.lineage_id();
        let job_id = self
            .dispatcher
            .enqueue_delivery(endpoint.id, delivery.event_id, lineage_id)
            .await?;
        tracing::info!(
            delivery_id = %delivery_id,
            endpoint_id = %endpoint.id,
            lineage_id = %lineage_id,
            job_id = %job_id,
            "delivery replay queued"
        );
        Ok(ReplayReceipt {
            delivery_id,
            lineage_id,
            job_id,
        })
    }
}
