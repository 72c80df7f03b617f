//! WorkerLoop - claim -> run processor -> complete/fail, for one queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::domain::HandlerError;
use crate::queue::{ClaimedJob, FailOutcome, JobStore, QueueOptions};
use crate::typed::{DynHandler, JobContext, ProcessorRegistry};

/// Timing knobs shared by every worker of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Longest a worker parks with nothing to do before polling again.
    pub idle_poll: Duration,
    /// Pause after the store reports an error.
    pub error_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            idle_poll: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

pub struct WorkerLoop {
    queue: String,
    store: Arc<dyn JobStore>,
    registry: Arc<ProcessorRegistry>,
    options: QueueOptions,
    settings: WorkerSettings,
}

impl WorkerLoop {
    pub fn new(
        queue: impl Into<String>,
        store: Arc<dyn JobStore>,
        registry: Arc<ProcessorRegistry>,
        options: QueueOptions,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue: queue.into(),
            store,
            registry,
            options,
            settings,
        }
    }

    /// Run until shutdown is signalled, then wait for in-flight jobs.
    ///
    /// At most `options.concurrency` processors run at once. Shutdown stops
    /// claiming; jobs already claimed run to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.options.concurrency.max(1);
        let slots = Arc::new(Semaphore::new(concurrency));
        let this = Arc::new(self);
        tracing::info!(queue = %this.queue, concurrency, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match this.store.claim(&this.queue).await {
                Ok(Some(job)) => {
                    let worker = Arc::clone(&this);
                    tokio::spawn(async move {
                        worker.process(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = this.store.wait_for_job(&this.queue, this.settings.idle_poll) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::warn!(queue = %this.queue, error = %e, "claim failed");
                    tokio::time::sleep(this.settings.error_backoff).await;
                }
            }
        }

        // Every slot back means every in-flight job has been settled.
        let _drained = slots.acquire_many(concurrency as u32).await;
        tracing::info!(queue = %this.queue, "worker stopped");
    }

    async fn process(&self, job: ClaimedJob) {
        let span = tracing::info_span!(
            "job",
            queue = %job.queue,
            job_type = %job.job_type,
            job_id = %job.id,
            attempt = job.attempt,
        );
        self.settle(job).instrument(span).await;
    }

    async fn settle(&self, job: ClaimedJob) {
        let ctx = JobContext {
            job_id: job.id,
            queue: job.queue.clone(),
            attempt: job.attempt,
            max_attempts: job.max_attempts,
        };

        let started = Instant::now();
        let result = match self.registry.get(&job.queue, &job.job_type) {
            Some(handler) => self.run_with_lease(&job, handler, ctx).await,
            None => Err(HandlerError::permanent(format!(
                "no processor registered for '{}' on queue '{}'",
                job.job_type, job.queue
            ))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => match self.store.complete(job.id, job.token).await {
                Ok(()) => tracing::debug!(elapsed_ms, "job completed"),
                Err(e) => tracing::warn!(error = %e, "could not mark job completed"),
            },
            Err(err) => match self.store.fail(job.id, job.token, &err).await {
                Ok(FailOutcome::Retrying { delay, .. }) => tracing::info!(
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "job failed, retry scheduled"
                ),
                Ok(FailOutcome::Failed) => tracing::warn!(
                    error = %err,
                    retryable = err.retryable,
                    "job failed permanently"
                ),
                Err(e) => tracing::warn!(error = %e, "could not record job failure"),
            },
        }
    }

    /// Run the processor in its own task while renewing the lease every half
    /// `lock_duration`. A panic counts as a retryable failure.
    async fn run_with_lease(
        &self,
        job: &ClaimedJob,
        handler: Arc<dyn DynHandler>,
        ctx: JobContext,
    ) -> Result<(), HandlerError> {
        let payload = job.payload.clone();
        let mut task = tokio::spawn(async move { handler.handle_dyn(payload, &ctx).await });

        let every = (self.options.lock_duration / 2).max(Duration::from_millis(1));
        let mut renew = tokio::time::interval_at(Instant::now() + every, every);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                joined = &mut task => {
                    return match joined {
                        Ok(result) => result,
                        Err(e) => Err(HandlerError::retryable(format!("processor aborted: {e}"))),
                    };
                }
                _ = renew.tick() => {
                    if let Err(e) = self.store.extend_lease(job.id, job.token).await {
                        tracing::warn!(job_id = %job.id, error = %e, "lease renewal failed");
                    }
                }
            }
        }
    }
}
