//! Typed job API.
//!
//! Two layers:
//! - **typed**: `Job` and `Handler<T>`, checked at compile time
//! - **dyn**: `DynHandler`, object-safe, what the workers call

pub mod handler;
pub mod job;
pub mod registry;

pub use self::handler::{DynHandler, Handler, JobContext, TypedHandler};
pub use self::job::Job;
pub use self::registry::{ProcessorRegistry, RegistryError};
