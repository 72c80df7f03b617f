//! WebhookStack - the webhook components wired onto one job store.

use std::sync::Arc;

use thiserror::Error;

use super::dispatcher::EventDispatcher;
use super::executor::{DeliverWebhook, DeliveryExecutor, ExecutorSettings};
use super::registry::EndpointRegistry;
use super::service::WebhookService;
use super::stats::StatsAggregator;
use crate::app::{App, AppBuilder, BuildError, JobQueue};
use crate::config::HooklineConfig;
use crate::domain::QueueError;
use crate::impls::{HttpClientConfig, InMemoryCounterStore, InMemoryWebhookRepository, ReqwestTransport};
use crate::ports::{
    Clock, CounterStore, EventBus, IdGenerator, SystemClock, TransportError, UlidGenerator,
    WebhookRepository, WebhookTransport,
};
use crate::queue::{InMemoryJobStore, JobStore};
use crate::typed::{Job, RegistryError};
use crate::worker::WorkerGroup;

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

/// Storage, transport and time sources the stack runs on.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub repo: Arc<dyn WebhookRepository>,
    pub counters: Arc<dyn CounterStore>,
    pub transport: Arc<dyn WebhookTransport>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl Backends {
    /// In-process stores around the given transport.
    pub fn in_memory(transport: Arc<dyn WebhookTransport>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            store: Arc::new(InMemoryJobStore::new(Arc::clone(&clock), Arc::clone(&ids))),
            repo: Arc::new(InMemoryWebhookRepository::new()),
            counters: Arc::new(InMemoryCounterStore::new()),
            transport,
            clock,
            ids,
        }
    }

    /// In-process stores delivering over HTTP.
    pub fn in_memory_http(config: &HooklineConfig) -> Result<Self, StackError> {
        let transport = ReqwestTransport::new(HttpClientConfig {
            user_agent: config.delivery.user_agent.clone(),
            max_response_bytes: config.delivery.max_response_bytes,
            ..HttpClientConfig::default()
        })?;
        Ok(Self::in_memory(Arc::new(transport)))
    }
}

pub struct WebhookStack {
    app: App,
    queue: JobQueue,
    service: Arc<WebhookService>,
    dispatcher: Arc<EventDispatcher>,
    executor: Arc<DeliveryExecutor>,
    stats: Arc<StatsAggregator>,
}

impl WebhookStack {
    /// Create the delivery queue and validate the processor wiring. No
    /// worker runs until `start`.
    pub async fn build(config: &HooklineConfig, backends: Backends) -> Result<Self, StackError> {
        let Backends {
            store,
            repo,
            counters,
            transport,
            clock,
            ids,
        } = backends;

        let queue = JobQueue::new(Arc::clone(&store));
        let options = config.queue.queue_options(config.delivery.default_job());
        queue.create_queue(DeliverWebhook::QUEUE, options).await?;

        let stats = Arc::new(StatsAggregator::new(
            counters,
            Arc::clone(&repo),
            config.stats.counter_ttl(),
            config.stats.recent_limit,
        ));
        let executor = Arc::new(DeliveryExecutor::new(
            Arc::clone(&repo),
            transport,
            Arc::clone(&stats),
            Arc::clone(&clock),
            Arc::clone(&ids),
            ExecutorSettings {
                timeout: config.delivery.timeout(),
                stored_response_bytes: config.delivery.stored_response_bytes,
                backoff: config.delivery.backoff(),
            },
        ));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&repo),
            queue.clone(),
            Arc::clone(&clock),
            Arc::clone(&ids),
        ));
        let registry = EndpointRegistry::new(
            Arc::clone(&repo),
            clock,
            Arc::clone(&ids),
            config.registry.allow_http,
        );
        let service = Arc::new(WebhookService::new(
            registry,
            repo,
            Arc::clone(&dispatcher),
            Arc::clone(&executor),
            Arc::clone(&stats),
            ids,
        ));

        let app = AppBuilder::new(store)
            .register::<DeliverWebhook, _>(Arc::clone(&executor))?
            .expect_jobs(&[(DeliverWebhook::QUEUE, DeliverWebhook::TYPE)])
            .with_settings(config.queue.worker_settings())
            .build()
            .await?;

        Ok(Self {
            app,
            queue,
            service,
            dispatcher,
            executor,
            stats,
        })
    }

    /// Route every catalog event published on `bus` into the dispatcher.
    pub fn subscribe(&self, bus: &dyn EventBus) {
        self.dispatcher.subscribe(bus);
    }

    pub fn start(&self) -> WorkerGroup {
        tracing::info!(queues = ?self.app.queues().keys().collect::<Vec<_>>(), "starting workers");
        self.app.start()
    }

    pub fn service(&self) -> Arc<WebhookService> {
        Arc::clone(&self.service)
    }

    pub fn dispatcher(&self) -> Arc<EventDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn executor(&self) -> Arc<DeliveryExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        Arc::clone(&self.stats)
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}
