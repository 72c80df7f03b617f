//! ProcessorRegistry - processors keyed by (queue, job type).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::job::Job;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a processor for '{job_type}' on queue '{queue}' is already registered")]
    AlreadyRegistered { queue: String, job_type: String },
}

/// Type-erased processors grouped by queue.
///
/// ```ignore
/// let mut registry = ProcessorRegistry::new();
/// registry.register::<DeliverWebhook, _>(executor)?;
/// let handler = registry.get("webhooks", "webhook.deliver");
/// ```
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    queues: HashMap<String, HashMap<String, Arc<dyn DynHandler>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Job, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.register_dyn(Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    pub fn register_dyn(&mut self, handler: Arc<dyn DynHandler>) -> Result<(), RegistryError> {
        let handlers = self.queues.entry(handler.queue().to_string()).or_default();
        if handlers.contains_key(handler.job_type()) {
            return Err(RegistryError::AlreadyRegistered {
                queue: handler.queue().to_string(),
                job_type: handler.job_type().to_string(),
            });
        }
        handlers.insert(handler.job_type().to_string(), handler);
        Ok(())
    }

    pub fn get(&self, queue: &str, job_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.queues.get(queue)?.get(job_type).cloned()
    }

    /// Queues with at least one processor, sorted.
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self.queues.keys().cloned().collect();
        queues.sort();
        queues
    }

    /// Every (queue, job type) pair, sorted.
    pub fn bindings(&self) -> Vec<(String, String)> {
        let bindings: BTreeSet<(String, String)> = self
            .queues
            .iter()
            .flat_map(|(queue, handlers)| handlers.keys().map(move |job_type| (queue.clone(), job_type.clone())))
            .collect();
        bindings.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
