//! InMemoryWebhookRepository - `WebhookRepository` for tests and the demo.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{
    DeliveryId, DeliveryQuery, EndpointFilter, EndpointId, EventId, EventName, LineageId,
    OwnerId, RepoError, WebhookDelivery, WebhookEndpoint, WebhookEvent,
};
use crate::ports::WebhookRepository;

#[derive(Default)]
struct Tables {
    endpoints: HashMap<EndpointId, WebhookEndpoint>,
    events: HashMap<EventId, WebhookEvent>,
    /// Insertion order is the ledger order.
    deliveries: Vec<WebhookDelivery>,
    delivery_index: HashMap<DeliveryId, usize>,
}

impl Tables {
    fn url_taken(&self, candidate: &WebhookEndpoint) -> bool {
        !candidate.is_deleted()
            && self.endpoints.values().any(|e| {
                e.id != candidate.id
                    && !e.is_deleted()
                    && e.owner_id == candidate.owner_id
                    && e.url == candidate.url
            })
    }

    fn live_endpoints(&self) -> impl Iterator<Item = &WebhookEndpoint> {
        self.endpoints.values().filter(|e| !e.is_deleted())
    }
}

fn oldest_first(mut endpoints: Vec<WebhookEndpoint>) -> Vec<WebhookEndpoint> {
    endpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    endpoints
}

#[derive(Default)]
pub struct InMemoryWebhookRepository {
    tables: RwLock<Tables>,
}

impl InMemoryWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event row, in no particular order.
    pub async fn events(&self) -> Vec<WebhookEvent> {
        self.tables.read().await.events.values().cloned().collect()
    }

    /// The whole ledger in insertion order.
    pub async fn deliveries(&self) -> Vec<WebhookDelivery> {
        self.tables.read().await.deliveries.clone()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn insert_endpoint(&self, endpoint: WebhookEndpoint) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        if tables.endpoints.contains_key(&endpoint.id) {
            return Err(RepoError::Conflict(format!("endpoint {} exists", endpoint.id)));
        }
        if tables.url_taken(&endpoint) {
            return Err(RepoError::Conflict(format!("url {} already registered", endpoint.url)));
        }
        tables.endpoints.insert(endpoint.id, endpoint);
        Ok(())
    }

    async fn get_endpoint(&self, id: EndpointId) -> Result<Option<WebhookEndpoint>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables.endpoints.get(&id).filter(|e| !e.is_deleted()).cloned())
    }

    async fn update_endpoint(&self, endpoint: WebhookEndpoint) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        match tables.endpoints.get(&endpoint.id) {
            Some(existing) if !existing.is_deleted() => {}
            _ => return Err(RepoError::NotFound),
        }
        if tables.url_taken(&endpoint) {
            return Err(RepoError::Conflict(format!("url {} already registered", endpoint.url)));
        }
        tables.endpoints.insert(endpoint.id, endpoint);
        Ok(())
    }

    async fn list_endpoints(
        &self,
        owner: &OwnerId,
        filter: &EndpointFilter,
    ) -> Result<Vec<WebhookEndpoint>, RepoError> {
        let tables = self.tables.read().await;
        let found = tables
            .live_endpoints()
            .filter(|e| &e.owner_id == owner && filter.matches(e))
            .cloned()
            .collect();
        Ok(oldest_first(found))
    }

    async fn find_subscribers(&self, event: EventName) -> Result<Vec<WebhookEndpoint>, RepoError> {
        let tables = self.tables.read().await;
        let found = tables.live_endpoints().filter(|e| e.accepts(event)).cloned().collect();
        Ok(oldest_first(found))
    }

    async fn insert_event(&self, event: WebhookEvent) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        if tables.events.contains_key(&event.id) {
            return Err(RepoError::Conflict(format!("event {} exists", event.id)));
        }
        tables.events.insert(event.id, event);
        Ok(())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<WebhookEvent>, RepoError> {
        Ok(self.tables.read().await.events.get(&id).cloned())
    }

    async fn insert_delivery(&self, delivery: WebhookDelivery) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        if tables.delivery_index.contains_key(&delivery.id) {
            return Err(RepoError::Conflict(format!("delivery {} exists", delivery.id)));
        }
        let position = tables.deliveries.len();
        tables.delivery_index.insert(delivery.id, position);
        tables.deliveries.push(delivery);
        Ok(())
    }

    async fn update_delivery(&self, delivery: WebhookDelivery) -> Result<(), RepoError> {
        let mut tables = self.tables.write().await;
        let position = *tables.delivery_index.get(&delivery.id).ok_or(RepoError::NotFound)?;
        tables.deliveries[position] = delivery;
        Ok(())
    }

    async fn get_delivery(&self, id: DeliveryId) -> Result<Option<WebhookDelivery>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .delivery_index
            .get(&id)
            .and_then(|position| tables.deliveries.get(*position))
            .cloned())
    }

    async fn list_lineage(&self, lineage: LineageId) -> Result<Vec<WebhookDelivery>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .iter()
            .filter(|d| d.lineage_id == lineage)
            .cloned()
            .collect())
    }

    async fn list_deliveries(
        &self,
        endpoint: EndpointId,
        query: &DeliveryQuery,
    ) -> Result<Vec<WebhookDelivery>, RepoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .deliveries
            .iter()
            .rev()
            .filter(|d| d.endpoint_id == endpoint)
            .filter(|d| query.status.is_none_or(|status| d.status == status))
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect())
    }
}
