//! CounterStore port - shared atomic counters with expiry.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::RepoError;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically add one and (re)arm the expiry. Returns the new value.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, RepoError>;

    /// Current value; 0 for a missing or expired key.
    async fn get(&self, key: &str) -> Result<u64, RepoError>;

    /// Re-arm the ttl of a live key. `false` when the key is absent or
    /// already expired.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, RepoError>;
}
