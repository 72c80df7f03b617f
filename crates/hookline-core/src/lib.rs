//! hookline-core
//!
//! At-least-once webhook delivery on a generic background job queue.
//!
//! - **queue**: job records, the state machine, backoff, and the `JobStore` port
//! - **typed**: typed jobs, handlers and the processor registry
//! - **app**: producer client, start-up validation, worker and stall-reaper loops
//! - **worker**: the running worker group of an `App`
//! - **domain**: ids, event catalog, endpoints, delivery ledger, errors
//! - **ports**: storage, transport, clock and event-bus seams
//! - **impls**: in-memory and reqwest implementations of the ports
//! - **webhooks**: registry, fan-out, signed delivery, stats, management service
//! - **config**: TOML configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;
pub mod webhooks;
pub mod worker;
