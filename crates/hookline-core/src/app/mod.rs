//! App - wiring of stores, processors, and worker loops.
//!
//! - **JobQueue**: producer handle (add / cancel / inspect)
//! - **AppBuilder**: processor registration with start-up validation
//! - **WorkerLoop**: claim -> process -> complete/fail, bounded concurrency
//! - **ReaperLoop**: recovery of jobs with expired leases

pub mod builder;
pub mod client;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::client::JobQueue;
pub use self::reaper_loop::ReaperLoop;
pub use self::worker_loop::{WorkerLoop, WorkerSettings};
