//! WebhookRepository port - durable storage of endpoints, events, and the
//! delivery ledger.
//!
//! Soft-deleted endpoints are invisible to every read here; they stay in
//! storage only so that ledger rows keep a valid reference.

use async_trait::async_trait;

use crate::domain::{
    DeliveryId, DeliveryQuery, EndpointFilter, EndpointId, EventId, EventName, LineageId,
    OwnerId, RepoError, WebhookDelivery, WebhookEndpoint, WebhookEvent,
};

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    /// `RepoError::Conflict` if the owner already has a live endpoint with
    /// the same URL.
    async fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<(), RepoError>;

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<WebhookEndpoint>, RepoError>;

    /// Whole-row replace (last writer wins). Setting `deleted_at` is the soft
    /// delete. Same conflict rule as `insert_endpoint`.
    async fn update_endpoint(&self, endpoint: WebhookEndpoint) -> Result<(), RepoError>;

    /// Live endpoints of `owner`, oldest first.
    async fn list_endpoints(
        &self,
        owner: &OwnerId,
        filter: &EndpointFilter,
    ) -> Result<Vec<WebhookEndpoint>, RepoError>;

    /// Enabled, live endpoints subscribed to `event`.
    async fn find_subscribers(&self, event: EventName) -> Result<Vec<WebhookEndpoint>, RepoError>;

    async fn insert_event(&self, event: WebhookEvent) -> Result<(), RepoError>;

    async fn get_event(&self, id: EventId) -> Result<Option<WebhookEvent>, RepoError>;

    async fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<(), RepoError>;

    async fn update_delivery(&self, delivery: WebhookDelivery) -> Result<(), RepoError>;

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<WebhookDelivery>, RepoError>;

    /// Rows of one lineage, oldest first.
    async fn list_lineage(&self, lineage: LineageId) -> Result<Vec<WebhookDelivery>, RepoError>;

    /// Rows of one endpoint, newest first, filtered and paged by `query`.
    async fn list_deliveries(
        &self,
        endpoint: EndpointId,
        query: &DeliveryQuery,
    ) -> Result<Vec<WebhookDelivery>, RepoError>;
}
