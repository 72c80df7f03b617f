//! Port implementations.
//!
//! - in-memory stores for tests and single-process runs
//! - `ReqwestTransport` for real HTTP, `RecordingTransport` for scripted runs

pub mod http_transport;
pub mod local_bus;
pub mod memory_counters;
pub mod memory_repository;
pub mod recording_transport;

pub use self::http_transport::{HttpClientConfig, ReqwestTransport};
pub use self::local_bus::LocalEventBus;
pub use self::memory_counters::InMemoryCounterStore;
pub use self::memory_repository::InMemoryWebhookRepository;
pub use self::recording_transport::{RecordedRequest, RecordingTransport, Scripted};
