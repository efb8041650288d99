pub mod registry;

pub use registry::JobRegistry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::{codec::Payload, engine::QueueEngine, EventKind, JobError, JobEvent, JobId, JobRecord, LockToken, QueueResult};

/// Handler outcome: the return value on success
pub type JobResult = Result<serde_json::Value, JobError>;

/// Business logic run for each claimed job
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: JobContext) -> JobResult;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, ctx: JobContext) -> JobResult {
        (**self).handle(ctx).await
    }
}

/// Handler backed by an async closure
pub struct HandlerFn<F> {
    f: F,
}

/// Wrap an async closure as a [`JobHandler`]
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> JobHandler for HandlerFn<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    async fn handle(&self, ctx: JobContext) -> JobResult {
        (self.f)(ctx).await
    }
}

/// What a handler sees of the job it is running.
///
/// Holds the claim's lock token, so progress updates are rejected once the
/// job has been reclaimed by another worker.
#[derive(Clone)]
pub struct JobContext {
    engine: QueueEngine,
    job: Arc<JobRecord>,
    token: LockToken,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub(crate) fn new(engine: QueueEngine, job: JobRecord, token: LockToken, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            job: Arc::new(job),
            token,
            cancelled,
        }
    }

    /// Snapshot of the job taken at claim time
    pub fn job(&self) -> &JobRecord {
        &self.job
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn queue(&self) -> &str {
        &self.job.queue
    }

    pub fn name(&self) -> &str {
        &self.job.name
    }

    pub fn payload(&self) -> &Payload {
        &self.job.payload
    }

    /// 1-based number of the running attempt
    pub fn attempt(&self) -> u32 {
        self.job.attempts_made + 1
    }

    /// Decode a JSON payload; a payload that does not decode can never succeed
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        self.job
            .payload
            .decode_json()
            .map_err(|e| JobError::fatal(format!("invalid payload: {}", e)))
    }

    /// Store progress and notify subscribers
    pub async fn update_progress(&self, progress: serde_json::Value) -> QueueResult<()> {
        self.engine
            .backend()
            .update_progress(&self.job.queue, &self.job.id, &self.token, progress.clone())
            .await?;

        let event = JobEvent::new(&self.job.queue, self.job.id.clone(), EventKind::Progress, self.engine.now())
            .with_payload(progress);
        self.engine.publish(event).await;
        Ok(())
    }

    /// Whether the worker asked this job to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("queue", &self.job.queue)
            .field("id", &self.job.id)
            .field("name", &self.job.name)
            .field("attempt", &self.attempt())
            .finish()
    }
}
