//! Per-endpoint delivery statistics.
//!
//! Rolling counters live in the shared `CounterStore` (one key per endpoint
//! and outcome, expiring after a quiet period); recent rows come from the
//! durable ledger.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{DeliveryQuery, EndpointId, WebhookDelivery, WebhookError};
use crate::ports::{CounterStore, WebhookRepository};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStats {
    pub endpoint_id: EndpointId,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub failed_deliveries: u64,
    /// Percentage, two decimals; 0 when nothing was delivered yet.
    pub success_rate: f64,
    pub recent_deliveries: Vec<WebhookDelivery>,
}

pub fn success_rate(successes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let pct = successes as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

fn counter_key(endpoint: EndpointId, bucket: &str) -> String {
    format!("webhook:stats:{endpoint}:{bucket}")
}

pub struct StatsAggregator {
    counters: Arc<dyn CounterStore>,
    repo: Arc<dyn WebhookRepository>,
    ttl: Duration,
    recent_limit: usize,
}

impl StatsAggregator {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        repo: Arc<dyn WebhookRepository>,
        ttl: Duration,
        recent_limit: usize,
    ) -> Self {
        Self {
            counters,
            repo,
            ttl,
            recent_limit,
        }
    }

    /// Count one finished attempt. All three keys of the endpoint get the
    /// same ttl so they expire together and `total = success + failed`.
    pub async fn record(&self, endpoint: EndpointId, success: bool) -> Result<(), WebhookError> {
        let (bucket, other) = if success {
            ("success", "failed")
        } else {
            ("failed", "success")
        };
        self.counters.incr(&counter_key(endpoint, "total"), self.ttl).await?;
        self.counters.incr(&counter_key(endpoint, bucket), self.ttl).await?;
        self.counters.expire(&counter_key(endpoint, other), self.ttl).await?;
        Ok(())
    }

    pub async fn get_stats(&self, endpoint: EndpointId) -> Result<EndpointStats, WebhookError> {
        let total = self.counters.get(&counter_key(endpoint, "total")).await?;
        let successful = self.counters.get(&counter_key(endpoint, "success")).await?;
        let failed = self.counters.get(&counter_key(endpoint, "failed")).await?;
        let recent = self
            .repo
            .list_deliveries(
                endpoint,
                &DeliveryQuery {
                    limit: self.recent_limit,
                    ..DeliveryQuery::default()
                },
            )
            .await?;

        Ok(EndpointStats {
            endpoint_id: endpoint,
            total_deliveries: total,
            successful_deliveries: successful,
            failed_deliveries: failed,
            success_rate: success_rate(successful, total),
            recent_deliveries: recent,
        })
    }
}
