//! Ports - traits at the storage, transport, and time seams.
//!
//! Every port has an in-memory implementation in `impls`; a deployment
//! swaps in database / key-value / HTTP backed ones.

pub mod clock;
pub mod counter_store;
pub mod event_bus;
pub mod id_generator;
pub mod repository;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::counter_store::CounterStore;
pub use self::event_bus::{EventBus, EventListener};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::repository::WebhookRepository;
pub use self::transport::{OutboundRequest, TransportError, TransportResponse, WebhookTransport};
