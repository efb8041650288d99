use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::state::QueueState;
use crate::{
    backend::{AddOutcome, ClaimOutcome, ClaimRequest, FailOutcome, PromotedJob, QueueBackend, StalledJob},
    config::Retention,
    scheduler::repeat::{RepeatableDefinition, RepeatableState},
    JobCounts, JobId, JobRecord, JobState, LockToken, NewJob, QueueResult,
};

/// In-memory backend for testing and development.
///
/// One lock guards every queue, so each operation is atomic with respect to
/// all others. The lock is never held across an await point.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self.queues.lock();
        f(queues.entry(queue.to_string()).or_default())
    }

    fn read_queue<T>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> Option<T> {
        self.queues.lock().get(queue).map(f)
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("queues", &self.queues.lock().len())
            .finish()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn add(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<AddOutcome> {
        let queue = job.queue.clone();
        Ok(self.with_queue(&queue, |state| state.add(job, now)))
    }

    async fn add_bulk(&self, jobs: Vec<NewJob>, now: DateTime<Utc>) -> Vec<QueueResult<AddOutcome>> {
        let mut queues = self.queues.lock();
        jobs.into_iter()
            .map(|job| {
                let state = queues.entry(job.queue.clone()).or_default();
                Ok(state.add(job, now))
            })
            .collect()
    }

    async fn claim(&self, queue: &str, request: ClaimRequest, now: DateTime<Utc>) -> QueueResult<ClaimOutcome> {
        Ok(self.with_queue(queue, |state| state.claim(&request, now)))
    }

    async fn extend_lock(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>> {
        self.with_queue(queue, |state| state.extend_lock(id, token, lease, now))
    }

    async fn update_progress(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        progress: serde_json::Value,
    ) -> QueueResult<()> {
        self.with_queue(queue, |state| state.update_progress(id, token, progress))
    }

    async fn complete(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        output: serde_json::Value,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.with_queue(queue, |state| state.complete(id, token, output, retention, now))
    }

    async fn fail(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome> {
        self.with_queue(queue, |state| state.fail(id, token, reason, retry_at, retention, now))
    }

    async fn promote_delayed(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<PromotedJob>> {
        Ok(self.with_queue(queue, |state| state.promote_delayed(now, limit)))
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
        retention: &Retention,
        now: DateTime<Utc>,
        limit: usize,
    ) -> QueueResult<Vec<StalledJob>> {
        Ok(self.with_queue(queue, |state| {
            state.recover_stalled(max_stalled_count, retention, now, limit)
        }))
    }

    async fn remove(&self, queue: &str, id: &JobId) -> QueueResult<bool> {
        self.with_queue(queue, |state| state.remove(id))
    }

    async fn retry_failed(&self, queue: &str, id: &JobId, _now: DateTime<Utc>) -> QueueResult<()> {
        self.with_queue(queue, |state| state.retry_failed(id))
    }

    async fn promote(&self, queue: &str, id: &JobId) -> QueueResult<()> {
        self.with_queue(queue, |state| state.promote(id))
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.read_queue(queue, |state| state.get_job(id)).flatten())
    }

    async fn list_jobs(&self, queue: &str, state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>> {
        Ok(self
            .read_queue(queue, |queue_state| queue_state.list_jobs(state, limit))
            .unwrap_or_default())
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        Ok(self.read_queue(queue, QueueState::counts).unwrap_or_default())
    }

    async fn upsert_repeatable(&self, definition: &RepeatableDefinition) -> QueueResult<bool> {
        self.with_queue(&definition.queue, |state| state.upsert_repeatable(definition))
    }

    async fn remove_repeatable(&self, queue: &str, name: &str) -> QueueResult<bool> {
        Ok(self.with_queue(queue, |state| state.remove_repeatable(name)))
    }

    async fn repeatables(&self, queue: &str) -> QueueResult<Vec<RepeatableState>> {
        Ok(self.read_queue(queue, QueueState::repeatables).unwrap_or_default())
    }

    async fn materialize_occurrence(
        &self,
        definition: &RepeatableDefinition,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobId>> {
        self.with_queue(&definition.queue, |state| {
            state.materialize_occurrence(definition, fire_at, now)
        })
    }
}
