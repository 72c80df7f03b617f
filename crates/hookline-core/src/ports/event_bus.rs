//! EventBus port - in-process domain event distribution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{DomainEvent, EventName, WebhookError};

#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &DomainEvent) -> Result<(), WebhookError>;
}

#[async_trait]
pub trait EventBus: Send + Sync {
    fn on(&self, name: EventName, listener: Arc<dyn EventListener>);

    /// Resolves once every listener for the event has returned. A failing
    /// listener does not stop the others. Returns how many succeeded.
    async fn emit(&self, event: DomainEvent) -> usize;
}
