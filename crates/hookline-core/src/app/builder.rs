//! AppBuilder - processor wiring with start-up validation.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::worker_loop::WorkerSettings;
use crate::domain::QueueError;
use crate::queue::{JobStore, QueueOptions};
use crate::typed::{Handler, Job, ProcessorRegistry, RegistryError};
use crate::worker::WorkerGroup;

/// Collects processors, then checks them against the store before any
/// worker starts.
///
/// ```ignore
/// let app = AppBuilder::new(store)
///     .register::<DeliverWebhook, _>(executor)?
///     .expect_jobs(&[("webhooks", "webhook.deliver")])
///     .build()
///     .await?;
/// let workers = app.start();
/// ```
///
/// `build` fails when an expected (queue, job type) has no processor or when
/// a processor targets a queue that was never created.
pub struct AppBuilder {
    store: Arc<dyn JobStore>,
    registry: ProcessorRegistry,
    expected: Vec<(String, String)>,
    settings: WorkerSettings,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing processors: {0:?}. These jobs were expected but not registered.")]
    MissingBindings(Vec<String>),

    #[error("processor registered for queue '{0}', which has not been created")]
    UnknownQueue(String),

    #[error(transparent)]
    Queue(QueueError),
}

impl AppBuilder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            registry: ProcessorRegistry::new(),
            expected: Vec::new(),
            settings: WorkerSettings::default(),
        }
    }

    pub fn register<T: Job, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_jobs(mut self, jobs: &[(&str, &str)]) -> Self {
        self.expected = jobs
            .iter()
            .map(|(queue, job_type)| (queue.to_string(), job_type.to_string()))
            .collect();
        self
    }

    pub fn with_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn build(self) -> Result<App, BuildError> {
        let missing: Vec<String> = self
            .expected
            .iter()
            .filter(|(queue, job_type)| self.registry.get(queue, job_type).is_none())
            .map(|(queue, job_type)| format!("{queue}/{job_type}"))
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingBindings(missing));
        }

        let mut queues = BTreeMap::new();
        for queue in self.registry.queues() {
            match self.store.queue_options(&queue).await {
                Ok(options) => {
                    queues.insert(queue, options);
                }
                Err(QueueError::UnknownQueue(name)) => return Err(BuildError::UnknownQueue(name)),
                Err(e) => return Err(BuildError::Queue(e)),
            }
        }

        Ok(App {
            store: self.store,
            registry: Arc::new(self.registry),
            queues,
            settings: self.settings,
        })
    }
}

/// Validated wiring, ready to start workers.
pub struct App {
    store: Arc<dyn JobStore>,
    registry: Arc<ProcessorRegistry>,
    queues: BTreeMap<String, QueueOptions>,
    settings: WorkerSettings,
}

impl App {
    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Queues that will get a worker, with the options they were created with.
    pub fn queues(&self) -> &BTreeMap<String, QueueOptions> {
        &self.queues
    }

    /// Spawn one worker loop and one stall reaper per queue.
    pub fn start(&self) -> WorkerGroup {
        WorkerGroup::spawn(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            &self.queues,
            self.settings.clone(),
        )
    }
}
