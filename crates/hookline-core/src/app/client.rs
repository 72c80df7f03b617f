//! JobQueue - producer-side handle on a `JobStore`.

use std::sync::Arc;

use crate::domain::{JobId, QueueError};
use crate::queue::{JobCounts, JobOptions, JobRecord, JobStore, QueueOptions};
use crate::typed::Job;

/// Cheap to clone; every clone talks to the same store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<QueueOptions, QueueError> {
        self.store.create_queue(name, options).await
    }

    /// Add a typed job to `T::QUEUE`.
    pub async fn add<T: Job>(&self, job: &T, options: JobOptions) -> Result<JobId, QueueError> {
        let payload = serde_json::to_value(job)?;
        self.add_raw(T::QUEUE, T::TYPE, payload, options).await
    }

    pub async fn add_raw(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, QueueError> {
        let job_id = self.store.add(queue, job_type, payload, options).await?;
        tracing::debug!(queue, job_type, job_id = %job_id, "job enqueued");
        Ok(job_id)
    }

    /// Cancel a job that has not started yet.
    pub async fn cancel(&self, job_id: JobId) -> Result<(), QueueError> {
        self.store.remove(job_id).await
    }

    pub async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, QueueError> {
        self.store.get(job_id).await
    }

    pub async fn counts(&self, queue: &str) -> Result<JobCounts, QueueError> {
        self.store.counts(queue).await
    }
}
