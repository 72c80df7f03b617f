//! Job record: metadata + payload.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::Backoff;
use super::JobState;
use super::options::ResolvedJobOptions;
use crate::domain::JobId;

/// Opaque proof that a worker holds the current lease on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseToken(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub token: LeaseToken,
    pub expires_at: Instant,
}

/// Single source of truth for one job.
///
/// Queue structures (ready set, delay heap) hold ids only; every state
/// transition happens through the methods below.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub job_type: String,
    pub payload: serde_json::Value,

    pub state: JobState,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub priority: u32,
    pub dedupe_key: Option<String>,

    /// Attempts started, including the current one while `Active`.
    pub attempts_made: u32,

    /// How many times the job was recovered after its lease lapsed.
    pub stalled_count: u32,

    pub last_error: Option<String>,

    /// When the job becomes (or became) eligible to run.
    pub run_at: Instant,

    /// Insertion order, the FIFO tie-breaker.
    pub seq: u64,

    pub lease: Option<Lease>,

    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub(crate) fn new(
        id: JobId,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: ResolvedJobOptions,
        seq: u64,
        now: Instant,
        created_at: DateTime<Utc>,
    ) -> Self {
        let state = if options.delay.is_zero() {
            JobState::Waiting
        } else {
            JobState::Delayed
        };
        Self {
            id,
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            payload,
            state,
            max_attempts: options.max_attempts,
            backoff: options.backoff,
            priority: options.priority,
            dedupe_key: options.dedupe_key,
            attempts_made: 0,
            stalled_count: 0,
            last_error: None,
            run_at: now + options.delay,
            seq,
            lease: None,
            created_at,
            processed_at: None,
            finished_at: None,
        }
    }

    pub fn holds(&self, token: LeaseToken) -> bool {
        self.state == JobState::Active && self.lease.is_some_and(|lease| lease.token == token)
    }

    /// Waiting -> Active.
    pub(crate) fn start_attempt(&mut self, lease: Lease, now: DateTime<Utc>) {
        self.state = JobState::Active;
        self.attempts_made += 1;
        self.lease = Some(lease);
        self.processed_at = Some(now);
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.lease = None;
        self.finished_at = Some(now);
    }

    pub(crate) fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.lease = None;
        self.last_error = Some(error);
        self.finished_at = Some(now);
    }

    /// Active -> Delayed, or straight back to Waiting when there is no wait.
    pub(crate) fn schedule_retry(&mut self, run_at: Instant, delayed: bool, error: String) {
        self.state = if delayed {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        self.lease = None;
        self.run_at = run_at;
        self.last_error = Some(error);
    }

    /// Delayed -> Waiting.
    pub(crate) fn promote(&mut self) {
        self.state = JobState::Waiting;
    }

    /// Active -> Waiting after the lease lapsed. The crashed attempt stays
    /// counted in `attempts_made`.
    pub(crate) fn requeue_stalled(&mut self, now: Instant) {
        self.state = JobState::Waiting;
        self.lease = None;
        self.run_at = now;
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }
}
