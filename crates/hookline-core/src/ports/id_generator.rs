//! IdGenerator port - id generation behind a trait for testability.
//!
//! # Implementations
//! - **UlidGenerator**: ULIDs whose timestamp part comes from a `Clock`

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{DeliveryId, EndpointId, EventId, JobId, LineageId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn next_ulid(&self) -> Ulid;

    fn job_id(&self) -> JobId {
        self.next_ulid().into()
    }

    fn endpoint_id(&self) -> EndpointId {
        self.next_ulid().into()
    }

    fn event_id(&self) -> EventId {
        self.next_ulid().into()
    }

    fn delivery_id(&self) -> DeliveryId {
        self.next_ulid().into()
    }

    fn lineage_id(&self) -> LineageId {
        self.next_ulid().into()
    }
}

/// ULID generator using the injected clock for the timestamp part, so a
/// `FixedClock` yields ids with a deterministic time prefix.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}
