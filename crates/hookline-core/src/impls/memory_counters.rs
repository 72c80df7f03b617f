//! InMemoryCounterStore - `CounterStore` with per-key expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::RepoError;
use crate::ports::CounterStore;

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64, RepoError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: now,
        });
        if counter.expires_at <= now {
            counter.value = 0;
        }
        counter.value += 1;
        counter.expires_at = now + ttl;
        Ok(counter.value)
    }

    async fn get(&self, key: &str) -> Result<u64, RepoError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        match counters.get(key) {
            Some(counter) if counter.expires_at > now => Ok(counter.value),
            Some(_) => {
                counters.remove(key);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, RepoError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        match counters.get_mut(key) {
            Some(counter) if counter.expires_at > now => {
                counter.expires_at = now + ttl;
                Ok(true)
            }
            Some(_) => {
                counters.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
