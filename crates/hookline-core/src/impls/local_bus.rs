//! LocalEventBus - in-process `EventBus`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::{DomainEvent, EventName};
use crate::ports::{EventBus, EventListener};

#[derive(Default)]
pub struct LocalEventBus {
    listeners: RwLock<HashMap<EventName, Vec<Arc<dyn EventListener>>>>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    fn on(&self, name: EventName, listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.entry(name).or_default().push(listener);
    }

    async fn emit(&self, event: DomainEvent) -> usize {
        let name = event.name();
        let listeners: Vec<Arc<dyn EventListener>> = {
            let listeners = self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            listeners.get(&name).cloned().unwrap_or_default()
        };

        let mut delivered = 0;
        for listener in listeners {
            match listener.on_event(&event).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::error!(event = %name, error = %e, "event listener failed"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{UserPayload, WebhookError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventListener for Counting {
        async fn on_event(&self, _event: &DomainEvent) -> Result<(), WebhookError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl EventListener for Broken {
        async fn on_event(&self, _event: &DomainEvent) -> Result<(), WebhookError> {
            Err(WebhookError::Internal("boom".into()))
        }
    }

    fn user_created() -> DomainEvent {
        DomainEvent::UserCreated(UserPayload {
            id: "u1".into(),
            email: None,
            name: None,
        })
    }

    #[tokio::test]
    async fn emit_reaches_only_listeners_of_that_event() {
        let bus = LocalEventBus::new();
        let created = Arc::new(Counting(AtomicUsize::new(0)));
        let deleted = Arc::new(Counting(AtomicUsize::new(0)));
        bus.on(EventName::UserCreated, created.clone());
        bus.on(EventName::UserDeleted, deleted.clone());

        assert_eq!(bus.emit(user_created()).await, 1);
        assert_eq!(created.0.load(Ordering::SeqCst), 1);
        assert_eq!(deleted.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_the_rest() {
        let bus = LocalEventBus::new();
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        bus.on(EventName::UserCreated, Arc::new(Broken));
        bus.on(EventName::UserCreated, counting.clone());

        assert_eq!(bus.emit(user_created()).await, 1);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
