use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::{ReaperLoop, WorkerLoop, WorkerSettings};
use crate::queue::{JobStore, QueueOptions};
use crate::typed::ProcessorRegistry;

/// Running workers of an `App`.
/// - one `WorkerLoop` and one `ReaperLoop` per queue
/// - `shutdown_and_join()` stops claiming and waits for in-flight jobs
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    pub fn spawn(
        store: Arc<dyn JobStore>,
        registry: Arc<ProcessorRegistry>,
        queues: &BTreeMap<String, QueueOptions>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(queues.len() * 2);
        for (queue, options) in queues {
            let worker = WorkerLoop::new(
                queue.clone(),
                Arc::clone(&store),
                Arc::clone(&registry),
                options.clone(),
                settings.clone(),
            );
            joins.push(tokio::spawn(worker.run(shutdown_rx.clone())));

            let reaper = ReaperLoop::new(queue.clone(), Arc::clone(&store), options.stalled_interval);
            joins.push(tokio::spawn(reaper.run(shutdown_rx.clone())));
        }

        Self { shutdown_tx, joins }
    }

    /// Stop claiming new jobs. In-flight processors are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker task ended abnormally");
            }
        }
    }
}
