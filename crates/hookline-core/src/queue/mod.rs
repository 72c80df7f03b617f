//! Job queue core: state machine, backoff, options, and the `JobStore` port
//! with its in-memory implementation.

mod memory;
mod options;
mod record;
mod retry;
mod state;

pub use memory::InMemoryJobStore;
pub use options::{DefaultJobOptions, JobOptions, QueueOptions, RetentionPolicy};
pub use record::{JobRecord, Lease, LeaseToken};
pub use retry::Backoff;
pub use state::JobState;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{HandlerError, JobId, QueueError};

/// A job handed to a worker by `claim`.
///
/// The worker owns the lease and must report back with `complete` or `fail`,
/// presenting `token`.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: JobId,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    /// 1-based number of this attempt.
    pub attempt: u32,
    pub max_attempts: u32,
    pub token: LeaseToken,
}

/// What the store did with a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { attempt: u32, delay: Duration },
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StalledReport {
    pub requeued: Vec<JobId>,
    pub failed: Vec<JobId>,
}

impl StalledReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Shared job state. Every worker instance of every queue talks to the same
/// store, so all transitions here must be atomic with respect to each other:
/// in particular `claim` hands a given job to at most one caller, and
/// `complete`/`fail` only succeed for the current lease holder.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Idempotent: an existing queue keeps its original options, which are
    /// returned.
    async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<QueueOptions, QueueError>;

    async fn queue_options(&self, name: &str) -> Result<QueueOptions, QueueError>;

    async fn add(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, QueueError>;

    /// Lease the next eligible job, or `None` if nothing is due.
    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError>;

    async fn extend_lease(&self, job_id: JobId, token: LeaseToken) -> Result<(), QueueError>;

    async fn complete(&self, job_id: JobId, token: LeaseToken) -> Result<(), QueueError>;

    async fn fail(
        &self,
        job_id: JobId,
        token: LeaseToken,
        error: &HandlerError,
    ) -> Result<FailOutcome, QueueError>;

    /// Cancel a waiting/delayed job (or drop a terminal one). Active jobs are
    /// never preempted: `QueueError::JobActive`.
    async fn remove(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Requeue (or fail) active jobs whose lease has expired.
    async fn recover_stalled(&self, queue: &str) -> Result<StalledReport, QueueError>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, QueueError>;

    async fn counts(&self, queue: &str) -> Result<JobCounts, QueueError>;

    /// Park until a job may be claimable on `queue`, at most `max_wait`.
    async fn wait_for_job(&self, queue: &str, max_wait: Duration);
}
