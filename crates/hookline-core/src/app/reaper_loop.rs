//! ReaperLoop - periodic recovery of jobs whose lease expired.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::queue::JobStore;

/// Requeues (or fails, past `max_stalled_count`) jobs whose worker stopped
/// renewing the lease, e.g. because the process died mid-job.
pub struct ReaperLoop {
    queue: String,
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl ReaperLoop {
    pub fn new(queue: impl Into<String>, store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self {
            queue: queue.into(),
            store,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        match self.store.recover_stalled(&self.queue).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => tracing::warn!(
                queue = %self.queue,
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "recovered stalled jobs"
            ),
            Err(e) => tracing::warn!(queue = %self.queue, error = %e, "stalled job check failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryJobStore, JobOptions, JobState, QueueOptions};
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn abandoned_job_is_requeued_by_the_reaper() {
        let store = Arc::new(InMemoryJobStore::default());
        let options = QueueOptions {
            lock_duration: Duration::from_secs(5),
            stalled_interval: Duration::from_secs(1),
            ..QueueOptions::default()
        };
        store.create_queue("q", options).await.unwrap();
        let id = store.add("q", "t", json!({}), JobOptions::default()).await.unwrap();

        // Claimed by a worker that then disappears.
        store.claim("q").await.unwrap().unwrap();

        let (tx, rx) = watch::channel(false);
        let reaper = ReaperLoop::new("q", store.clone(), Duration::from_secs(1));
        let join = tokio::spawn(reaper.run(rx));

        tokio::time::sleep(Duration::from_secs(7)).await;
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Waiting);
        assert_eq!(record.stalled_count, 1);

        tx.send(true).unwrap();
        join.await.unwrap();
    }
}
