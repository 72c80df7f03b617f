//! Runtime configuration, read from TOML. Every field has a default, so an
//! empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::app::WorkerSettings;
use crate::queue::{Backoff, DefaultJobOptions, QueueOptions, RetentionPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HooklineConfig {
    pub queue: QueueConfig,
    pub delivery: DeliveryConfig,
    pub stats: StatsConfig,
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub lock_duration_secs: u64,
    pub stalled_interval_secs: u64,
    pub max_stalled_count: u32,
    /// Upper bound on how long an idle worker parks before polling.
    pub poll_interval_ms: u64,
    pub keep_completed: Option<usize>,
    pub keep_failed: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            lock_duration_secs: 30,
            stalled_interval_secs: 30,
            max_stalled_count: 1,
            poll_interval_ms: 1_000,
            keep_completed: Some(1_000),
            keep_failed: Some(5_000),
        }
    }
}

impl QueueConfig {
    pub fn queue_options(&self, default_job: DefaultJobOptions) -> QueueOptions {
        QueueOptions {
            concurrency: self.concurrency,
            lock_duration: Duration::from_secs(self.lock_duration_secs),
            stalled_interval: Duration::from_secs(self.stalled_interval_secs),
            max_stalled_count: self.max_stalled_count,
            default_job,
            retention: RetentionPolicy {
                keep_completed: self.keep_completed,
                keep_failed: self.keep_failed,
            },
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            idle_poll: Duration::from_millis(self.poll_interval_ms),
            ..WorkerSettings::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub timeout_secs: u64,
    /// Bytes of the response body read from the wire.
    pub max_response_bytes: usize,
    /// Bytes of the response body kept on the delivery row.
    pub stored_response_bytes: usize,
    pub user_agent: String,
    /// Wait after attempt `n` fails is `retry_delays_secs[n - 1]`.
    pub retry_delays_secs: Vec<u64>,
    pub max_attempts: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_response_bytes: 64 * 1024,
            stored_response_bytes: 1024,
            user_agent: format!("hookline/{}", env!("CARGO_PKG_VERSION")),
            retry_delays_secs: vec![60, 300, 900],
            max_attempts: 3,
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::table(
            self.retry_delays_secs
                .iter()
                .map(|secs| Duration::from_secs(*secs))
                .collect::<Vec<_>>(),
        )
    }

    pub fn default_job(&self) -> DefaultJobOptions {
        DefaultJobOptions {
            attempts: self.max_attempts,
            backoff: self.backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub counter_ttl_secs: u64,
    pub recent_limit: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            counter_ttl_secs: 24 * 60 * 60,
            recent_limit: 10,
        }
    }
}

impl StatsConfig {
    pub fn counter_ttl(&self) -> Duration {
        Duration::from_secs(self.counter_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Accept `http://` endpoint URLs. Meant for local development.
    pub allow_http: bool,
}

impl HooklineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HooklineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.concurrency == 0 {
            return Err(ConfigError::Invalid("queue.concurrency must be at least 1".into()));
        }
        if self.queue.lock_duration_secs == 0 {
            return Err(ConfigError::Invalid("queue.lock_duration_secs must be at least 1".into()));
        }
        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::Invalid("delivery.max_attempts must be at least 1".into()));
        }
        if self.delivery.timeout_secs == 0 {
            return Err(ConfigError::Invalid("delivery.timeout_secs must be at least 1".into()));
        }
        if self.delivery.retry_delays_secs.is_empty() {
            return Err(ConfigError::Invalid("delivery.retry_delays_secs must not be empty".into()));
        }
        Ok(())
    }
}
