use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dog_jobs::backend::{AddOutcome, ClaimOutcome, ClaimRequest, FailOutcome, PromotedJob, StalledJob};
use dog_jobs::prelude::*;
use dog_jobs::{JobCounts, LockToken, NewJob, Processed, RepeatableState, Retention};

/// Memory store whose settlement writes fail while outages remain
#[derive(Default)]
struct FlakyStore {
    inner: MemoryBackend,
    complete_outages: AtomicUsize,
    fail_outages: AtomicUsize,
    settle_calls: AtomicUsize,
}

impl FlakyStore {
    fn outage(counter: &AtomicUsize) -> QueueResult<()> {
        let remaining = counter.load(Ordering::SeqCst);
        if remaining > 0 {
            counter.store(remaining - 1, Ordering::SeqCst);
            return Err(QueueError::Backend("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for FlakyStore {
    async fn add(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<AddOutcome> {
        self.inner.add(job, now).await
    }

    async fn claim(&self, queue: &str, request: ClaimRequest, now: DateTime<Utc>) -> QueueResult<ClaimOutcome> {
        self.inner.claim(queue, request, now).await
    }

    async fn extend_lock(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>> {
        self.inner.extend_lock(queue, id, token, lease, now).await
    }

    async fn update_progress(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        progress: serde_json::Value,
    ) -> QueueResult<()> {
        self.inner.update_progress(queue, id, token, progress).await
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
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        Self::outage(&self.complete_outages)?;
        self.inner.complete(queue, id, token, output, retention, now).await
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
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        Self::outage(&self.fail_outages)?;
        self.inner.fail(queue, id, token, reason, retry_at, retention, now).await
    }

    async fn promote_delayed(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<PromotedJob>> {
        self.inner.promote_delayed(queue, now, limit).await
    }

    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
        retention: &Retention,
        now: DateTime<Utc>,
        limit: usize,
    ) -> QueueResult<Vec<StalledJob>> {
        self.inner.recover_stalled(queue, max_stalled_count, retention, now, limit).await
    }

    async fn remove(&self, queue: &str, id: &JobId) -> QueueResult<bool> {
        self.inner.remove(queue, id).await
    }

    async fn retry_failed(&self, queue: &str, id: &JobId, now: DateTime<Utc>) -> QueueResult<()> {
        self.inner.retry_failed(queue, id, now).await
    }

    async fn promote(&self, queue: &str, id: &JobId) -> QueueResult<()> {
        self.inner.promote(queue, id).await
    }

    async fn get_job(&self, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.inner.get_job(queue, id).await
    }

    async fn list_jobs(&self, queue: &str, state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>> {
        self.inner.list_jobs(queue, state, limit).await
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        self.inner.counts(queue).await
    }

    async fn upsert_repeatable(&self, definition: &RepeatableDefinition) -> QueueResult<bool> {
        self.inner.upsert_repeatable(definition).await
    }

    async fn remove_repeatable(&self, queue: &str, name: &str) -> QueueResult<bool> {
        self.inner.remove_repeatable(queue, name).await
    }

    async fn repeatables(&self, queue: &str) -> QueueResult<Vec<RepeatableState>> {
        self.inner.repeatables(queue).await
    }

    async fn materialize_occurrence(
        &self,
        definition: &RepeatableDefinition,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobId>> {
        self.inner.materialize_occurrence(definition, fire_at, now).await
    }
}

fn setup(store: FlakyStore) -> (Arc<FlakyStore>, Queue) {
    let store = Arc::new(store);
    let engine = QueueEngine::from_shared(store.clone());
    let queue = engine
        .queue("settle", QueueOptions::default().with_max_stalled_count(0))
        .unwrap();
    (store, queue)
}

fn quick_retries() -> WorkerOptions {
    WorkerOptions::new()
        .with_lease_duration(Duration::from_secs(2))
        .with_infra_retry_backoff(Duration::from_millis(10), Duration::from_millis(40))
}

/// A store blip while recording success does not lose the result
#[tokio::test]
async fn test_completion_survives_store_blip() {
    let (store, queue) = setup(FlakyStore { complete_outages: AtomicUsize::new(1), ..Default::default() });
    let id = queue.add(Payload::default(), JobOptions::new()).await.unwrap();
    let worker = queue
        .worker_with(
            handler_fn(|_ctx: JobContext| async move { Ok::<_, JobError>(serde_json::json!("done")) }),
            quick_retries(),
        )
        .unwrap();

    assert_eq!(worker.process_next().await.unwrap(), Processed::Completed(id.clone()));
    assert_eq!(store.settle_calls.load(Ordering::SeqCst), 2);

    let job = queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.return_value, Some(serde_json::json!("done")));

    // Nothing is left for the stall monitor to reclaim
    let stalled = queue.stall_monitor(StallMonitorOptions::default()).tick().await.unwrap();
    assert!(stalled.is_empty());
}

/// A failed attempt is still recorded through repeated store errors
#[tokio::test]
async fn test_failure_survives_store_blips() {
    let (store, queue) = setup(FlakyStore { fail_outages: AtomicUsize::new(2), ..Default::default() });
    let id = queue
        .add(Payload::default(), JobOptions::new().with_max_attempts(3))
        .await
        .unwrap();
    let worker = queue
        .worker_with(
            handler_fn(|_ctx: JobContext| async move {
                Err::<serde_json::Value, _>(JobError::retryable("upstream timeout"))
            }),
            quick_retries(),
        )
        .unwrap();

    assert_eq!(worker.process_next().await.unwrap(), Processed::Retrying(id.clone()));
    assert_eq!(store.settle_calls.load(Ordering::SeqCst), 3);

    let job = queue.get_job(&id).await.unwrap().unwrap();
    assert_eq!(job.attempts_made, 1);
    assert_eq!(job.failed_reason.as_deref(), Some("upstream timeout"));
}

/// A lasting outage gives up within the lease and leaves the job to the stall monitor
#[tokio::test]
async fn test_lasting_outage_gives_up() {
    let (_store, queue) = setup(FlakyStore { complete_outages: AtomicUsize::new(usize::MAX), ..Default::default() });
    let id = queue.add(Payload::default(), JobOptions::new()).await.unwrap();
    let options = WorkerOptions::new()
        .with_lease_duration(Duration::from_millis(300))
        .with_infra_retry_backoff(Duration::from_millis(10), Duration::from_millis(40));
    let worker = queue
        .worker_with(
            handler_fn(|_ctx: JobContext| async move { Ok::<_, JobError>(serde_json::Value::Null) }),
            options,
        )
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), worker.process_next())
        .await
        .expect("settlement retries must stop");
    assert!(matches!(result, Err(QueueError::Backend(_))));
    assert_eq!(queue.get_job(&id).await.unwrap().unwrap().state, JobState::Active);
}
