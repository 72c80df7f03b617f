//! Backoff: attempt number -> wait before the next retry.

use std::time::Duration;

/// Backoff strategy for failed jobs.
///
/// `delay(n)` is the wait after the `n`-th attempt failed (1-indexed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),

    /// `min(base * 2^(n-1), cap)`.
    Exponential { base: Duration, cap: Duration },

    /// Explicit table indexed by `n - 1`; the last entry repeats past the end.
    Table(Vec<Duration>),
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed(delay)
    }

    pub fn exponential(base: Duration, cap: Duration) -> Self {
        Backoff::Exponential { base, cap }
    }

    pub fn table(delays: impl Into<Vec<Duration>>) -> Self {
        Backoff::Table(delays.into())
    }

    /// Example with `Exponential { base: 2s, cap: 10s }`:
    /// - attempt 1: 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - attempt 4: 10s (capped)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, cap } => 2u32
                .checked_pow(exponent)
                .and_then(|factor| base.checked_mul(factor))
                .map_or(*cap, |delay| delay.min(*cap)),
            Backoff::Table(delays) => delays
                .get(exponent as usize)
                .or_else(|| delays.last())
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(300),
        }
    }
}
