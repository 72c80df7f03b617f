//! In-memory job store.
//!
//! One `tokio::sync::Mutex` guards the whole state, which makes every
//! operation (claim in particular) atomic. A distributed store would provide
//! the same guarantees through its own primitives (CAS / leased claims).

use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::options::QueueOptions;
use super::record::{JobRecord, Lease, LeaseToken};
use super::{ClaimedJob, FailOutcome, JobCounts, JobOptions, JobState, JobStore, StalledReport};
use crate::domain::{HandlerError, JobId, QueueError};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

const STALLED_ERROR: &str = "job stalled more than allowable limit";
const STALLED_ON_LAST_ATTEMPT: &str = "job stalled on its last attempt";

/// Delay-heap entry. Reverse ordering turns `BinaryHeap` into a min-heap
/// (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    run_at: Instant,
    job_id: JobId,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.job_id.cmp(&self.job_id))
    }
}

/// Claim order: priority, then scheduled time, then insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: u32,
    run_at: Instant,
    seq: u64,
    job_id: JobId,
}

impl ReadyKey {
    fn of(record: &JobRecord) -> Self {
        Self {
            priority: record.priority,
            run_at: record.run_at,
            seq: record.seq,
            job_id: record.id,
        }
    }
}

struct QueueState {
    options: QueueOptions,
    ready: BTreeSet<ReadyKey>,
    scheduled: BinaryHeap<ScheduledJob>,
    active: HashSet<JobId>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn new(options: QueueOptions) -> Self {
        Self {
            options,
            ready: BTreeSet::new(),
            scheduled: BinaryHeap::new(),
            active: HashSet::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Move delayed jobs whose time has come to the ready set. Heap entries
    /// left behind by removed or rescheduled jobs are dropped here.
    fn promote_due(&mut self, jobs: &mut HashMap<JobId, JobRecord>, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.run_at > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(record) = jobs.get_mut(&entry.job_id)
                && record.state == JobState::Delayed
                && record.run_at == entry.run_at
            {
                record.promote();
                self.ready.insert(ReadyKey::of(record));
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.scheduled.peek().map(|entry| entry.run_at)
    }
}

struct StoreState {
    queues: HashMap<String, QueueState>,
    jobs: HashMap<JobId, JobRecord>,
    dedupe: HashMap<(String, String), JobId>,
    next_seq: u64,
    next_token: u64,
}

impl StoreState {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            jobs: HashMap::new(),
            dedupe: HashMap::new(),
            next_seq: 1,
            next_token: 1,
        }
    }

    fn queue_mut(&mut self, name: &str) -> Result<&mut QueueState, QueueError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| QueueError::UnknownQueue(name.to_string()))
    }

    fn allocate_token(&mut self) -> LeaseToken {
        let token = LeaseToken(self.next_token);
        self.next_token += 1;
        token
    }

    /// Drop a job record and everything pointing at it.
    fn forget(&mut self, job_id: JobId) -> Option<JobRecord> {
        let record = self.jobs.remove(&job_id)?;
        if let Some(key) = &record.dedupe_key {
            let dedupe_key = (record.queue.clone(), key.clone());
            if self.dedupe.get(&dedupe_key) == Some(&job_id) {
                self.dedupe.remove(&dedupe_key);
            }
        }
        Some(record)
    }

    /// Record a terminal transition in the queue's history and apply the
    /// retention bound.
    fn retain_terminal(&mut self, queue: &str, job_id: JobId, state: JobState) {
        let Some(q) = self.queues.get_mut(queue) else {
            return;
        };
        let (history, keep) = match state {
            JobState::Completed => (&mut q.completed, q.options.retention.keep_completed),
            JobState::Failed => (&mut q.failed, q.options.retention.keep_failed),
            _ => return,
        };
        history.push_back(job_id);

        let mut pruned = Vec::new();
        if let Some(keep) = keep {
            while history.len() > keep {
                if let Some(old) = history.pop_front() {
                    pruned.push(old);
                }
            }
        }
        for old in pruned {
            self.forget(old);
        }
    }

    fn lease_holder(&mut self, job_id: JobId, token: LeaseToken) -> Result<&mut JobRecord, QueueError> {
        let record = self
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::JobNotFound(job_id))?;
        if !record.holds(token) {
            return Err(QueueError::LeaseLost(job_id));
        }
        Ok(record)
    }
}

/// In-memory `JobStore`.
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            clock,
            ids,
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::new(clock, ids)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<QueueOptions, QueueError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.queues.get(name) {
            return Ok(existing.options.clone());
        }
        options.validate()?;
        state
            .queues
            .insert(name.to_string(), QueueState::new(options.clone()));
        tracing::debug!(queue = name, concurrency = options.concurrency, "queue created");
        Ok(options)
    }

    async fn queue_options(&self, name: &str) -> Result<QueueOptions, QueueError> {
        let mut state = self.state.lock().await;
        Ok(state.queue_mut(name)?.options.clone())
    }

    async fn add(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId, QueueError> {
        let (id, notify) = {
            let mut state = self.state.lock().await;
            let defaults = state.queue_mut(queue)?.options.default_job.clone();
            let options = options.resolve(&defaults)?;

            if let Some(key) = &options.dedupe_key
                && let Some(existing) = state.dedupe.get(&(queue.to_string(), key.clone()))
            {
                return Ok(*existing);
            }

            let id = self.ids.job_id();
            let seq = state.next_seq;
            state.next_seq += 1;
            let record = JobRecord::new(
                id,
                queue,
                job_type,
                payload,
                options,
                seq,
                Instant::now(),
                self.clock.now(),
            );

            if let Some(key) = &record.dedupe_key {
                state.dedupe.insert((queue.to_string(), key.clone()), id);
            }
            let q = state.queue_mut(queue)?;
            match record.state {
                JobState::Delayed => q.scheduled.push(ScheduledJob {
                    run_at: record.run_at,
                    job_id: id,
                }),
                _ => {
                    q.ready.insert(ReadyKey::of(&record));
                }
            }
            let notify = Arc::clone(&q.notify);
            state.jobs.insert(id, record);
            tracing::trace!(queue, job_type, job_id = %id, "job added");
            (id, notify)
        };

        // Notify outside the lock
        notify.notify_one();
        Ok(id)
    }

    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, QueueError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let token = state.allocate_token();
        let StoreState { queues, jobs, .. } = &mut *state;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        q.promote_due(jobs, now);

        while let Some(key) = q.ready.pop_first() {
            let Some(record) = jobs.get_mut(&key.job_id) else {
                continue;
            };
            if record.state != JobState::Waiting {
                continue;
            }
            record.start_attempt(
                Lease {
                    token,
                    expires_at: now + q.options.lock_duration,
                },
                self.clock.now(),
            );
            q.active.insert(record.id);
            return Ok(Some(ClaimedJob {
                id: record.id,
                queue: record.queue.clone(),
                job_type: record.job_type.clone(),
                payload: record.payload.clone(),
                attempt: record.attempts_made,
                max_attempts: record.max_attempts,
                token,
            }));
        }
        Ok(None)
    }

    async fn extend_lease(&self, job_id: JobId, token: LeaseToken) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let queue = state.lease_holder(job_id, token)?.queue.clone();
        let lock_duration = state.queue_mut(&queue)?.options.lock_duration;
        let record = state.lease_holder(job_id, token)?;
        record.lease = Some(Lease {
            token,
            expires_at: Instant::now() + lock_duration,
        });
        Ok(())
    }

    async fn complete(&self, job_id: JobId, token: LeaseToken) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let record = state.lease_holder(job_id, token)?;
        record.mark_completed(now);
        let queue = record.queue.clone();

        state.queue_mut(&queue)?.active.remove(&job_id);
        state.retain_terminal(&queue, job_id, JobState::Completed);
        Ok(())
    }

    async fn fail(
        &self,
        job_id: JobId,
        token: LeaseToken,
        error: &HandlerError,
    ) -> Result<FailOutcome, QueueError> {
        let (outcome, notify) = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            let record = state.lease_holder(job_id, token)?;
            let queue = record.queue.clone();
            let attempt = record.attempts_made;

            let outcome = if error.retryable && record.attempts_made < record.max_attempts {
                let delay = record.backoff.delay(attempt);
                let run_at = Instant::now() + delay;
                record.schedule_retry(run_at, !delay.is_zero(), error.message.clone());
                let key = ReadyKey::of(record);
                let delayed = record.state == JobState::Delayed;

                let q = state.queue_mut(&queue)?;
                q.active.remove(&job_id);
                if delayed {
                    q.scheduled.push(ScheduledJob { run_at, job_id });
                } else {
                    q.ready.insert(key);
                }
                FailOutcome::Retrying { attempt, delay }
            } else {
                record.mark_failed(error.message.clone(), now);
                state.queue_mut(&queue)?.active.remove(&job_id);
                state.retain_terminal(&queue, job_id, JobState::Failed);
                FailOutcome::Failed
            };

            // A parked worker may be sleeping until a later due time.
            let notify = match outcome {
                FailOutcome::Retrying { .. } => Some(Arc::clone(&state.queue_mut(&queue)?.notify)),
                FailOutcome::Failed => None,
            };
            (outcome, notify)
        };

        if let Some(notify) = notify {
            notify.notify_one();
        }
        Ok(outcome)
    }

    async fn remove(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let record = state.jobs.get(&job_id).ok_or(QueueError::JobNotFound(job_id))?;
        let queue = record.queue.clone();
        let job_state = record.state;
        let key = ReadyKey::of(record);

        let q = state.queue_mut(&queue)?;
        match job_state {
            JobState::Active => return Err(QueueError::JobActive(job_id)),
            JobState::Waiting => {
                q.ready.remove(&key);
            }
            // The heap entry goes stale and is skipped on promotion.
            JobState::Delayed => {}
            JobState::Completed => q.completed.retain(|id| *id != job_id),
            JobState::Failed => q.failed.retain(|id| *id != job_id),
        }
        state.forget(job_id);
        tracing::debug!(job_id = %job_id, queue = %queue, "job removed");
        Ok(())
    }

    async fn recover_stalled(&self, queue: &str) -> Result<StalledReport, QueueError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let utc_now = self.clock.now();
        let mut report = StalledReport::default();

        let StoreState { queues, jobs, .. } = &mut *state;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let expired: Vec<JobId> = q
            .active
            .iter()
            .copied()
            .filter(|id| {
                jobs.get(id)
                    .and_then(|record| record.lease)
                    .is_none_or(|lease| lease.expires_at <= now)
            })
            .collect();

        for job_id in expired {
            q.active.remove(&job_id);
            let Some(record) = jobs.get_mut(&job_id) else {
                continue;
            };
            record.stalled_count += 1;
            if record.stalled_count > q.options.max_stalled_count {
                record.mark_failed(STALLED_ERROR.to_string(), utc_now);
                report.failed.push(job_id);
            } else if record.attempts_exhausted() {
                record.mark_failed(STALLED_ON_LAST_ATTEMPT.to_string(), utc_now);
                report.failed.push(job_id);
            } else {
                record.requeue_stalled(now);
                q.ready.insert(ReadyKey::of(record));
                report.requeued.push(job_id);
            }
        }

        let notify = Arc::clone(&q.notify);
        for job_id in &report.failed {
            state.retain_terminal(queue, *job_id, JobState::Failed);
        }
        drop(state);

        if !report.requeued.is_empty() {
            notify.notify_one();
        }
        Ok(report)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&job_id).cloned())
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts, QueueError> {
        let mut state = self.state.lock().await;
        let StoreState { queues, jobs, .. } = &mut *state;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
        q.promote_due(jobs, Instant::now());

        let mut counts = JobCounts::default();
        for record in jobs.values().filter(|record| record.queue == queue) {
            match record.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn wait_for_job(&self, queue: &str, max_wait: Duration) {
        let (notify, next_due) = {
            let state = self.state.lock().await;
            match state.queues.get(queue) {
                Some(q) => (Arc::clone(&q.notify), q.next_due()),
                None => {
                    drop(state);
                    tokio::time::sleep(max_wait).await;
                    return;
                }
            }
        };

        let deadline = Instant::now() + max_wait;
        let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
        tokio::select! {
            _ = notify.notified() => {},
            _ = tokio::time::sleep_until(wake_at) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{Backoff, RetentionPolicy};
    use serde_json::json;

    const Q: &str = "jobs";

    async fn store_with(options: QueueOptions) -> InMemoryJobStore {
        let store = InMemoryJobStore::default();
        store.create_queue(Q, options).await.unwrap();
        store
    }

    async fn store() -> InMemoryJobStore {
        store_with(QueueOptions::default()).await
    }

    #[tokio::test]
    async fn add_then_claim_leases_the_job() {
        let store = store().await;
        let id = store.add(Q, "t", json!({"n": 1}), JobOptions::default()).await.unwrap();

        let claimed = store.claim(Q).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempt, 1);
        assert_eq!(claimed.payload, json!({"n": 1}));
        assert!(store.claim(Q).await.unwrap().is_none());

        let counts = store.counts(Q).await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn unknown_queue_is_rejected() {
        let store = InMemoryJobStore::default();
        let err = store.add("nope", "t", json!({}), JobOptions::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownQueue(_)));
    }

    #[tokio::test]
    async fn create_queue_is_idempotent() {
        let store = store_with(QueueOptions::default().with_concurrency(4)).await;
        let kept = store
            .create_queue(Q, QueueOptions::default().with_concurrency(9))
            .await
            .unwrap();
        assert_eq!(kept.concurrency, 4);
    }

    #[tokio::test]
    async fn complete_marks_job_completed() {
        let store = store().await;
        let id = store.add(Q, "t", json!({}), JobOptions::default()).await.unwrap();
        let claimed = store.claim(Q).await.unwrap().unwrap();
        store.complete(id, claimed.token).await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.attempts_made, 1);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn lower_priority_value_is_claimed_first_then_fifo() {
        let store = store().await;
        let a = store.add(Q, "t", json!({}), JobOptions::default().with_priority(5)).await.unwrap();
        let b = store.add(Q, "t", json!({}), JobOptions::default().with_priority(1)).await.unwrap();
        let c = store.add(Q, "t", json!({}), JobOptions::default().with_priority(5)).await.unwrap();

        let order: Vec<JobId> = [
            store.claim(Q).await.unwrap().unwrap().id,
            store.claim(Q).await.unwrap().unwrap().id,
            store.claim(Q).await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, vec![b, a, c]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_is_not_claimable_before_due() {
        let store = store().await;
        let id = store
            .add(Q, "t", json!({}), JobOptions::delayed(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.counts(Q).await.unwrap().delayed, 1);
        assert!(store.claim(Q).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(10)).await;
        let claimed = store.claim(Q).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_waits_for_backoff() {
        let store = store().await;
        let id = store
            .add(
                Q,
                "t",
                json!({}),
                JobOptions::default()
                    .with_attempts(3)
                    .with_backoff(Backoff::table([Duration::from_secs(60), Duration::from_secs(300)])),
            )
            .await
            .unwrap();

        let first = store.claim(Q).await.unwrap().unwrap();
        let outcome = store
            .fail(id, first.token, &HandlerError::retryable("boom"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying { attempt: 1, delay: Duration::from_secs(60) }
        );
        assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Delayed);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.claim(Q).await.unwrap().is_none());
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = store.claim(Q).await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);

        let outcome = store
            .fail(id, second.token, &HandlerError::retryable("boom"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying { attempt: 2, delay: Duration::from_secs(300) }
        );

        tokio::time::advance(Duration::from_secs(300)).await;
        let third = store.claim(Q).await.unwrap().unwrap();
        assert_eq!(third.attempt, 3);
        let outcome = store
            .fail(id, third.token, &HandlerError::retryable("boom"))
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Failed);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.attempts_made, 3);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn permanent_failure_skips_remaining_attempts() {
        let store = store().await;
        let id = store
            .add(Q, "t", json!({}), JobOptions::default().with_attempts(5))
            .await
            .unwrap();
        let claimed = store.claim(Q).await.unwrap().unwrap();
        let outcome = store
            .fail(id, claimed.token, &HandlerError::permanent("bad payload"))
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Failed);
        assert_eq!(store.get(id).await.unwrap().unwrap().attempts_made, 1);
    }

    #[tokio::test]
    async fn zero_backoff_requeues_immediately() {
        let store = store().await;
        let id = store
            .add(
                Q,
                "t",
                json!({}),
                JobOptions::default().with_backoff(Backoff::fixed(Duration::ZERO)),
            )
            .await
            .unwrap();
        let claimed = store.claim(Q).await.unwrap().unwrap();
        store.fail(id, claimed.token, &HandlerError::retryable("x")).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().state, JobState::Waiting);
        assert_eq!(store.claim(Q).await.unwrap().unwrap().attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_delayed_job_never_runs() {
        let store = store().await;
        let id = store
            .add(Q, "t", json!({}), JobOptions::delayed(Duration::from_secs(5)))
            .await
            .unwrap();
        store.remove(id).await.unwrap();
        assert!(store.get(id).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(store.claim(Q).await.unwrap().is_none());
        assert_eq!(store.counts(Q).await.unwrap(), JobCounts::default());
    }

    #[tokio::test]
    async fn active_job_cannot_be_removed() {
        let store = store().await;
        let id = store.add(Q, "t", json!({}), JobOptions::default()).await.unwrap();
        store.claim(Q).await.unwrap().unwrap();
        let err = store.remove(id).await.unwrap_err();
        assert!(matches!(err, QueueError::JobActive(_)));
    }

    #[tokio::test]
    async fn dedupe_key_returns_existing_job() {
        let store = store().await;
        let a = store
            .add(Q, "t", json!({"v": 1}), JobOptions::default().with_dedupe_key("k"))
            .await
            .unwrap();
        let b = store
            .add(Q, "t", json!({"v": 2}), JobOptions::default().with_dedupe_key("k"))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(store.counts(Q).await.unwrap().waiting, 1);

        store.remove(a).await.unwrap();
        let c = store
            .add(Q, "t", json!({}), JobOptions::default().with_dedupe_key("k"))
            .await
            .unwrap();
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn retention_prunes_oldest_completed_jobs() {
        let store = store_with(QueueOptions::default().with_retention(RetentionPolicy {
            keep_completed: Some(2),
            keep_failed: None,
        }))
        .await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = store.add(Q, "t", json!({}), JobOptions::default()).await.unwrap();
            let claimed = store.claim(Q).await.unwrap().unwrap();
            store.complete(id, claimed.token).await.unwrap();
            ids.push(id);
        }

        assert!(store.get(ids[0]).await.unwrap().is_none());
        assert!(store.get(ids[1]).await.unwrap().is_some());
        assert!(store.get(ids[2]).await.unwrap().is_some());
        assert_eq!(store.counts(Q).await.unwrap().completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_requeued_and_keeps_its_attempt_count() {
        let options = QueueOptions {
            lock_duration: Duration::from_secs(5),
            max_stalled_count: 1,
            ..QueueOptions::default()
        };
        let store = store_with(options).await;
        let id = store.add(Q, "t", json!({}), JobOptions::default()).await.unwrap();
        let stale = store.claim(Q).await.unwrap().unwrap();

        assert!(store.recover_stalled(Q).await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(5)).await;
        let report = store.recover_stalled(Q).await.unwrap();
        assert_eq!(report.requeued, vec![id]);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Waiting);
        assert_eq!(record.attempts_made, 1);
        assert_eq!(record.stalled_count, 1);

        // The old holder lost its lease.
        let err = store.complete(id, stale.token).await.unwrap_err();
        assert!(matches!(err, QueueError::LeaseLost(_)));

        let again = store.claim(Q).await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);
        assert_eq!(store.get(id).await.unwrap().unwrap().attempts_made, 2);
        tokio::time::advance(Duration::from_secs(5)).await;
        let report = store.recover_stalled(Q).await.unwrap();
        assert_eq!(report.failed, vec![id]);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.last_error.as_deref(), Some(STALLED_ERROR));
    }

    #[tokio::test(start_paused = true)]
    async fn stall_on_last_attempt_fails_instead_of_exceeding_max_attempts() {
        let options = QueueOptions {
            lock_duration: Duration::from_secs(5),
            max_stalled_count: 5,
            ..QueueOptions::default()
        };
        let store = store_with(options).await;
        let id = store
            .add(Q, "t", json!({}), JobOptions::default().with_attempts(2))
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let claimed = store.claim(Q).await.unwrap().unwrap();
            seen.push(claimed.attempt);
            tokio::time::advance(Duration::from_secs(5)).await;
            store.recover_stalled(Q).await.unwrap();
            let made = store.get(id).await.unwrap().unwrap().attempts_made;
            assert_eq!(made, claimed.attempt, "attempts_made never goes backwards");
        }
        assert_eq!(seen, vec![1, 2]);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.attempts_made, 2);
        assert_eq!(record.last_error.as_deref(), Some(STALLED_ON_LAST_ATTEMPT));
        assert!(store.claim(Q).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn extend_lease_keeps_job_active() {
        let options = QueueOptions {
            lock_duration: Duration::from_secs(4),
            ..QueueOptions::default()
        };
        let store = store_with(options).await;
        let id = store.add(Q, "t", json!({}), JobOptions::default()).await.unwrap();
        let claimed = store.claim(Q).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        store.extend_lease(id, claimed.token).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(store.recover_stalled(Q).await.unwrap().is_empty());
        store.complete(id, claimed.token).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_job_wakes_on_add() {
        let store = Arc::new(store().await);
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let started = Instant::now();
                store.wait_for_job(Q, Duration::from_secs(60)).await;
                started.elapsed()
            })
        };
        tokio::task::yield_now().await;
        store.add(Q, "t", json!({}), JobOptions::default()).await.unwrap();

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_job_wakes_at_next_due_time() {
        let store = store().await;
        store
            .add(Q, "t", json!({}), JobOptions::delayed(Duration::from_secs(7)))
            .await
            .unwrap();

        let started = Instant::now();
        // The add above already stored a permit; consume it first.
        store.wait_for_job(Q, Duration::from_secs(60)).await;
        store.wait_for_job(Q, Duration::from_secs(60)).await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(7) && waited < Duration::from_secs(8));
        assert!(store.claim(Q).await.unwrap().is_some());
    }
}
