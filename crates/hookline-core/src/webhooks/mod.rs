//! Webhook delivery on top of the job queue: endpoint registry, event
//! fan-out, signed delivery, stats and the management service.

pub mod dispatcher;
pub mod executor;
pub mod registry;
pub mod service;
pub mod signature;
pub mod stack;
pub mod stats;

pub use dispatcher::{EventDispatcher, FanOutReport};
pub use executor::{DeliverWebhook, DeliveryExecutor, Envelope, ExecutorSettings, TEST_EVENT};
pub use registry::EndpointRegistry;
pub use service::{ReplayReceipt, WebhookService};
pub use stack::{Backends, StackError, WebhookStack};
pub use stats::{EndpointStats, StatsAggregator};
