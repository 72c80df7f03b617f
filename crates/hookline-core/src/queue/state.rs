//! Job state machine.

use serde::{Deserialize, Serialize};

/// Job state.
///
/// State transitions:
/// - Waiting -> Active -> Completed
/// - Waiting -> Active -> Delayed -> Waiting (retry with backoff, while attempts remain)
/// - Waiting -> Active -> Waiting (retry with zero backoff, or stalled-job recovery)
/// - Waiting -> Active -> Failed (attempts exhausted, permanent error, stalled too often, or stalled on the last attempt)
/// - Delayed -> Waiting (timer elapses)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Eligible to be claimed.
    Waiting,

    /// Scheduled for later (initial delay or retry backoff).
    Delayed,

    /// Leased by a worker and running.
    Active,

    /// Handler succeeded.
    Completed,

    /// Terminal failure.
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Can the job still be cancelled without any handler invocation?
    pub fn is_cancellable(self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed)
    }
}
