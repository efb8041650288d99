//! Worker pool: claim, run the handler, keep the lease alive, settle.

mod heartbeat;

use dashmap::DashMap;
use futures::StreamExt;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    backend::{ClaimOutcome, ClaimRequest, FailOutcome},
    clock,
    config::WorkerOptions,
    job::{JobContext, JobHandler, JobResult},
    queue::Queue,
    EventKind, JobError, JobEvent, JobId, JobRecord, LeasedJob, LockToken, QueueError, QueueResult,
};
use heartbeat::LeaseKeeper;

type CancelFlags = Arc<DashMap<JobId, Arc<AtomicBool>>>;

/// Result of one claim/execute/settle cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    Completed(JobId),

    /// Failed attempt with attempts left
    Retrying(JobId),

    Failed(JobId),

    /// The lock was lost before settlement and the result was dropped
    Discarded(JobId),

    /// Nothing ready to claim
    Empty,

    /// Rate limit reached; retry after the given delay
    RateLimited(Duration),
}

/// Worker pool bound to one queue
pub struct Worker {
    queue: Queue,
    handler: Arc<dyn JobHandler>,
    options: WorkerOptions,
    cancellations: CancelFlags,
    wake: Arc<Notify>,
}

impl Worker {
    pub(crate) fn new(queue: Queue, handler: Arc<dyn JobHandler>, options: WorkerOptions) -> Self {
        Self {
            queue,
            handler,
            options,
            cancellations: Arc::new(DashMap::new()),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Spawn `concurrency` slots and return the handle controlling them
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let concurrency = self.queue.options().concurrency;
        let queue = self.queue.name().to_string();
        let cancellations = self.cancellations.clone();
        let worker = Arc::new(self);

        let listener = tokio::spawn(worker.clone().listen_for_work(shutdown_rx.clone()));
        let slots = (0..concurrency)
            .map(|slot| tokio::spawn(worker.clone().run_slot(slot, shutdown_rx.clone())))
            .collect();

        info!(queue = %queue, concurrency, "Started worker");

        WorkerHandle {
            queue,
            shutdown_tx,
            slots,
            listener,
            cancellations,
        }
    }

    /// Claim and run at most one job
    #[instrument(skip(self), fields(queue = %self.queue.name()))]
    pub async fn process_next(&self) -> QueueResult<Processed> {
        let engine = self.queue.engine();
        let request = ClaimRequest {
            lease: self.options.lease_duration,
            rate_limit: self.queue.options().rate_limit,
        };

        match engine.backend().claim(self.queue.name(), request, engine.now()).await? {
            ClaimOutcome::Claimed(leased) => self.run_leased(leased).await,
            ClaimOutcome::Empty => Ok(Processed::Empty),
            ClaimOutcome::RateLimited { retry_after } => {
                debug!(?retry_after, "Rate limited");
                Ok(Processed::RateLimited(retry_after))
            }
        }
    }

    async fn run_leased(&self, leased: LeasedJob) -> QueueResult<Processed> {
        let engine = self.queue.engine();
        let queue = self.queue.name();
        let id = leased.record.id.clone();
        let token = leased.token.clone();
        let record = leased.record.clone();

        engine.metrics().increment_jobs_claimed(queue);
        let active = JobEvent::new(queue, id.clone(), EventKind::Active, engine.now())
            .with_payload(serde_json::json!({ "attempt": record.attempts_made + 1 }));
        engine.publish(active).await;
        debug!(job_id = %id, name = %record.name, "Processing job");

        let cancelled = Arc::new(AtomicBool::new(false));
        self.cancellations.insert(id.clone(), cancelled.clone());
        let keeper = LeaseKeeper::start(
            engine.clone(),
            queue.to_string(),
            id.clone(),
            token.clone(),
            self.options.lease_duration,
            self.options.heartbeat_interval,
        );

        let ctx = JobContext::new(engine.clone(), leased.record, token.clone(), cancelled);
        let handler = self.handler.clone();
        let started = Instant::now();
        // A separate task turns handler panics into a join error
        let result = match tokio::spawn(async move { handler.handle(ctx).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobError::retryable(format!(
                "handler panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(JobError::retryable(format!("handler task failed: {}", e))),
        };

        self.cancellations.remove(&id);
        engine
            .metrics()
            .record_processing_time(queue, clock::to_chrono(started.elapsed()));

        // The lease stays renewed while settlement is retried
        let settled = self.settle(&record, &token, result).await;
        keeper.stop();

        match settled {
            Err(QueueError::LockMismatch(_)) | Err(QueueError::JobNotFound(_)) => {
                warn!(job_id = %id, "Lock lost before settlement, discarding result");
                Ok(Processed::Discarded(id))
            }
            other => other,
        }
    }

    /// Retry a settlement write through store outages for at most one lease
    async fn with_store_retry<T, F, Fut>(&self, id: &JobId, mut write: F) -> QueueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let deadline = tokio::time::Instant::now() + self.options.lease_duration;
        let mut backoff = self.options.infra_retry_backoff;
        loop {
            match write().await {
                Err(e) if e.is_infrastructure() && tokio::time::Instant::now() + backoff < deadline => {
                    warn!(job_id = %id, ?backoff, "Settlement failed, retrying: {}", e);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.options.max_infra_retry_backoff);
                }
                other => return other,
            }
        }
    }

    async fn settle(&self, record: &JobRecord, token: &LockToken, result: JobResult) -> QueueResult<Processed> {
        let engine = self.queue.engine();
        let queue = self.queue.name();
        let options = self.queue.options();
        let id = &record.id;
        let now = engine.now();

        let error = match result {
            Ok(output) => {
                self.with_store_retry(id, || {
                    engine
                        .backend()
                        .complete(queue, id, token, output.clone(), &options.keep_completed, now)
                })
                .await?;
                engine.metrics().increment_jobs_completed(queue);
                engine
                    .publish(JobEvent::new(queue, id.clone(), EventKind::Completed, now).with_payload(output))
                    .await;
                info!(job_id = %id, "Job completed");
                return Ok(Processed::Completed(id.clone()));
            }
            Err(error) => error,
        };

        let attempt = record.attempts_made + 1;
        let retry_at = (error.is_retryable() && attempt < record.max_attempts).then(|| match record.backoff {
            Some(backoff) => clock::after(now, backoff.compute(attempt)),
            None => now,
        });

        let outcome = self
            .with_store_retry(id, || {
                engine
                    .backend()
                    .fail(queue, id, token, error.message(), retry_at, &options.keep_failed, now)
            })
            .await?;

        match outcome {
            FailOutcome::Retrying { at } => {
                engine.metrics().increment_jobs_retried(queue);
                let event = JobEvent::new(queue, id.clone(), EventKind::Retrying, now).with_payload(
                    serde_json::json!({ "reason": error.message(), "attempt": attempt, "retry_at": at }),
                );
                engine.publish(event).await;
                warn!(job_id = %id, attempt, %at, "Job failed, will retry: {}", error);
                Ok(Processed::Retrying(id.clone()))
            }
            FailOutcome::Requeued => {
                engine.metrics().increment_jobs_retried(queue);
                let event = JobEvent::new(queue, id.clone(), EventKind::Retrying, now).with_payload(
                    serde_json::json!({ "reason": error.message(), "attempt": attempt, "retry_at": now }),
                );
                engine.publish(event).await;
                engine
                    .publish(JobEvent::new(queue, id.clone(), EventKind::Waiting, now))
                    .await;
                warn!(job_id = %id, attempt, "Job failed, retrying now: {}", error);
                Ok(Processed::Retrying(id.clone()))
            }
            FailOutcome::Failed => {
                engine.metrics().increment_jobs_failed(queue);
                let event = JobEvent::new(queue, id.clone(), EventKind::Failed, now)
                    .with_payload(serde_json::json!({ "reason": error.message(), "attempt": attempt }));
                engine.publish(event).await;
                error!(job_id = %id, attempt, "Job failed permanently: {}", error);
                Ok(Processed::Failed(id.clone()))
            }
        }
    }

    /// Wake idle slots when jobs become ready
    async fn listen_for_work(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut events = match self.queue.events().await {
            Ok(events) => events,
            Err(e) => {
                warn!(queue = %self.queue.name(), "Worker runs without wake-ups: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.next() => match event {
                    Some(event) if event.kind == EventKind::Waiting => self.wake.notify_waiters(),
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }

    async fn run_slot(self: Arc<Self>, slot: usize, mut shutdown: watch::Receiver<bool>) {
        let mut idle_backoff = self.options.poll_interval;
        let mut infra_backoff = self.options.infra_retry_backoff;
        debug!(queue = %self.queue.name(), slot, "Worker slot started");

        loop {
            // A dropped handle closes the channel
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            let (pause, wake_early) = match self.process_next().await {
                Ok(Processed::Empty) => {
                    let pause = idle_backoff;
                    idle_backoff = (idle_backoff * 2).min(self.options.max_poll_interval);
                    infra_backoff = self.options.infra_retry_backoff;
                    (Some(pause), true)
                }
                Ok(Processed::RateLimited(retry_after)) => {
                    idle_backoff = self.options.poll_interval;
                    (Some(retry_after.max(Duration::from_millis(1))), false)
                }
                Ok(_) => {
                    idle_backoff = self.options.poll_interval;
                    infra_backoff = self.options.infra_retry_backoff;
                    (None, false)
                }
                Err(e) => {
                    error!(queue = %self.queue.name(), slot, "Error processing job: {}", e);
                    let pause = infra_backoff;
                    infra_backoff = (infra_backoff * 2).min(self.options.max_infra_retry_backoff);
                    (Some(pause), false)
                }
            };

            let Some(pause) = pause else {
                continue;
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(pause) => {}
                _ = self.wake.notified(), if wake_early => {
                    idle_backoff = self.options.poll_interval;
                }
            }
        }

        debug!(queue = %self.queue.name(), slot, "Worker slot stopped");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("queue", &self.queue.name())
            .field("options", &self.options)
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle for managing worker lifecycle.
///
/// Dropping the handle stops the slots after their current job, like
/// [`shutdown`](Self::shutdown) without waiting.
pub struct WorkerHandle {
    queue: String,
    shutdown_tx: watch::Sender<bool>,
    slots: Vec<JoinHandle<()>>,
    listener: JoinHandle<()>,
    cancellations: CancelFlags,
}

impl WorkerHandle {
    /// Ask a running job to stop; `false` if it is not running here
    pub fn cancel_job(&self, id: &JobId) -> bool {
        match self.cancellations.get(id) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Jobs currently running in this pool
    pub fn in_flight(&self) -> usize {
        self.cancellations.len()
    }

    /// Stop claiming, signal cancellation to running jobs and wait for them to settle
    pub async fn shutdown(self) -> QueueResult<()> {
        let _ = self.shutdown_tx.send(true);
        for flag in self.cancellations.iter() {
            flag.value().store(true, Ordering::Release);
        }

        for slot in self.slots {
            slot.await
                .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?;
        }
        self.listener
            .await
            .map_err(|e| QueueError::Internal(format!("Worker join error: {}", e)))?;

        info!(queue = %self.queue, "Worker stopped");
        Ok(())
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("queue", &self.queue)
            .field("slots", &self.slots.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
