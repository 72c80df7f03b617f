//! Queue and job options.

use std::time::Duration;

use super::Backoff;
use crate::domain::QueueError;

/// How many terminal jobs a queue keeps around for inspection.
/// `None` keeps everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_completed: Option<usize>,
    pub keep_failed: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_completed: Some(1_000),
            keep_failed: Some(5_000),
        }
    }
}

/// Defaults applied to every job added without an explicit override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultJobOptions {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for DefaultJobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Per-queue settings. Fixed when the queue is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    /// Upper bound of simultaneously active jobs per worker group.
    pub concurrency: usize,

    /// Lease length granted on claim; renewed by the worker while the
    /// handler runs.
    pub lock_duration: Duration,

    /// How often the reaper looks for expired leases.
    pub stalled_interval: Duration,

    /// Number of stalled recoveries after which a job fails instead of being
    /// requeued.
    pub max_stalled_count: u32,

    pub default_job: DefaultJobOptions,
    pub retention: RetentionPolicy,
}

impl QueueOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_default_job(mut self, attempts: u32, backoff: Backoff) -> Self {
        self.default_job = DefaultJobOptions { attempts, backoff };
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.concurrency == 0 {
            return Err(QueueError::InvalidOptions("concurrency must be at least 1".into()));
        }
        if self.default_job.attempts == 0 {
            return Err(QueueError::InvalidOptions("attempts must be at least 1".into()));
        }
        if self.lock_duration.is_zero() {
            return Err(QueueError::InvalidOptions("lock_duration must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            lock_duration: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
            max_stalled_count: 1,
            default_job: DefaultJobOptions::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

/// Options given to `add`. Unset fields fall back to the queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub delay: Duration,
    pub attempts: Option<u32>,
    pub backoff: Option<Backoff>,
    /// Lower value is claimed first; equal priorities are FIFO by scheduled time.
    pub priority: u32,
    /// While a job with the same key is still stored, adding again returns it.
    pub dedupe_key: Option<String>,
}

impl JobOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub(crate) fn resolve(self, defaults: &DefaultJobOptions) -> Result<ResolvedJobOptions, QueueError> {
        let max_attempts = self.attempts.unwrap_or(defaults.attempts);
        if max_attempts == 0 {
            return Err(QueueError::InvalidOptions("attempts must be at least 1".into()));
        }
        Ok(ResolvedJobOptions {
            delay: self.delay,
            max_attempts,
            backoff: self.backoff.unwrap_or_else(|| defaults.backoff.clone()),
            priority: self.priority,
            dedupe_key: self.dedupe_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedJobOptions {
    pub delay: Duration,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub priority: u32,
    pub dedupe_key: Option<String>,
}
