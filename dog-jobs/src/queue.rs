use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::{
    backend::{AddOutcome, BoxStream},
    codec::Payload,
    config::{QueueOptions, SchedulerOptions, StallMonitorOptions, WorkerOptions},
    engine::QueueEngine,
    job::JobHandler,
    scheduler::{repeat::RepeatableDefinition, repeat::RepeatableState, Scheduler},
    stall::StallMonitor,
    worker::Worker,
    EventKind, JobCounts, JobEvent, JobId, JobOptions, JobRecord, JobState, NewJob, QueueResult,
};

/// Producer handle on one named queue.
///
/// The options are fixed for the lifetime of the handle: default job options
/// apply to every job added through it, and workers, schedulers and stall
/// monitors created from it inherit concurrency, rate limit and retention.
#[derive(Clone)]
pub struct Queue {
    engine: QueueEngine,
    name: Arc<str>,
    options: Arc<QueueOptions>,
}

impl Queue {
    pub(crate) fn new(engine: QueueEngine, name: String, options: QueueOptions) -> Self {
        Self {
            engine,
            name: name.into(),
            options: Arc::new(options),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn engine(&self) -> &QueueEngine {
        &self.engine
    }

    fn submission(&self, payload: Payload, options: &JobOptions) -> QueueResult<NewJob> {
        let merged = options.merged_with(&self.options.default_job_options);
        NewJob::from_options(self.name(), payload, &merged, self.engine.now())
    }

    async fn announce_added(&self, outcome: &AddOutcome, job: Option<&NewJob>) {
        if !outcome.created {
            debug!(queue = %self.name, job_id = %outcome.id, "Job already exists");
            return;
        }
        self.engine.metrics().increment_jobs_added(&self.name);

        let kind = if outcome.state == JobState::Delayed { EventKind::Delayed } else { EventKind::Waiting };
        let mut event = JobEvent::new(self.name(), outcome.id.clone(), kind, self.engine.now());
        if let Some(delay_until) = job.and_then(|job| job.delay_until).filter(|_| kind == EventKind::Delayed) {
            event = event.with_payload(serde_json::json!({ "delay_until": delay_until }));
        }
        self.engine.publish(event).await;
    }

    /// Add a job; an existing `job_id` returns the existing job unchanged
    #[instrument(skip(self, payload, options), fields(queue = %self.name))]
    pub async fn add(&self, payload: Payload, options: JobOptions) -> QueueResult<JobId> {
        let job = self.submission(payload, &options)?;
        let outcome = self.engine.backend().add(job.clone(), self.engine.now()).await?;
        self.announce_added(&outcome, Some(&job)).await;
        Ok(outcome.id)
    }

    /// Add a JSON-encoded job
    pub async fn add_json<T: Serialize>(&self, value: &T, options: JobOptions) -> QueueResult<JobId> {
        self.add(Payload::json(value)?, options).await
    }

    /// Add several jobs in order.
    ///
    /// Each entry succeeds or fails on its own; results are in input order.
    #[instrument(skip(self, jobs), fields(queue = %self.name, count = jobs.len()))]
    pub async fn add_bulk(&self, jobs: Vec<(Payload, JobOptions)>) -> Vec<QueueResult<JobId>> {
        let mut results: Vec<Option<QueueResult<JobId>>> = Vec::with_capacity(jobs.len());
        let mut valid = Vec::new();
        let mut slots = Vec::new();

        for (payload, options) in jobs {
            match self.submission(payload, &options) {
                Ok(job) => {
                    slots.push(results.len());
                    valid.push(job);
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let submitted = valid.clone();
        let outcomes = self.engine.backend().add_bulk(valid, self.engine.now()).await;
        for ((slot, outcome), job) in slots.into_iter().zip(outcomes).zip(submitted.iter()) {
            results[slot] = Some(match outcome {
                Ok(outcome) => {
                    self.announce_added(&outcome, Some(job)).await;
                    Ok(outcome.id)
                }
                Err(e) => Err(e),
            });
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| Err(crate::QueueError::Internal("missing bulk result".to_string())))
            })
            .collect()
    }

    /// Register a repeatable definition on this queue.
    ///
    /// Returns `false` when an identical definition was already registered,
    /// in which case its anchor is kept.
    #[instrument(skip(self, definition), fields(queue = %self.name, name = %definition.name))]
    pub async fn schedule(&self, mut definition: RepeatableDefinition) -> QueueResult<bool> {
        definition.queue = self.name.to_string();
        definition.template.options = definition
            .template
            .options
            .merged_with(&self.options.default_job_options);
        let now = self.engine.now();
        definition.created_at.get_or_insert(now);
        definition.validate()?;
        // Occurrences must be constructible before the definition is stored
        definition.occurrence(now, now)?;

        let changed = self.engine.backend().upsert_repeatable(&definition).await?;
        if changed {
            info!("Registered repeatable {}", definition.name);
        }
        Ok(changed)
    }

    pub async fn remove_repeatable(&self, name: &str) -> QueueResult<bool> {
        self.engine.backend().remove_repeatable(&self.name, name).await
    }

    pub async fn repeatables(&self) -> QueueResult<Vec<RepeatableState>> {
        self.engine.backend().repeatables(&self.name).await
    }

    /// Delete a job that is not active
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn remove(&self, id: &JobId) -> QueueResult<bool> {
        let removed = self.engine.backend().remove(&self.name, id).await?;
        if removed {
            self.engine
                .publish(JobEvent::new(self.name(), id.clone(), EventKind::Removed, self.engine.now()))
                .await;
        }
        Ok(removed)
    }

    pub async fn get_job(&self, id: &JobId) -> QueueResult<Option<JobRecord>> {
        self.engine.backend().get_job(&self.name, id).await
    }

    pub async fn counts(&self) -> QueueResult<JobCounts> {
        self.engine.backend().counts(&self.name).await
    }

    pub async fn list_jobs(&self, state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>> {
        self.engine.backend().list_jobs(&self.name, state, limit).await
    }

    /// Move a failed job back to waiting with its attempts reset
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn retry_job(&self, id: &JobId) -> QueueResult<()> {
        self.engine.backend().retry_failed(&self.name, id, self.engine.now()).await?;
        self.engine
            .publish(JobEvent::new(self.name(), id.clone(), EventKind::Waiting, self.engine.now()))
            .await;
        Ok(())
    }

    /// Make a delayed job due now
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn promote_job(&self, id: &JobId) -> QueueResult<()> {
        self.engine.backend().promote(&self.name, id).await?;
        self.engine
            .publish(JobEvent::new(self.name(), id.clone(), EventKind::Waiting, self.engine.now()))
            .await;
        Ok(())
    }

    /// Stream of this queue's events
    pub async fn events(&self) -> QueueResult<BoxStream<JobEvent>> {
        self.engine.events().subscribe(&self.name).await
    }

    /// Call `callback` for every event of `kind` until the subscription drops
    pub async fn on<F>(&self, kind: EventKind, callback: F) -> QueueResult<Subscription>
    where
        F: Fn(JobEvent) + Send + Sync + 'static,
    {
        let mut stream = self.events().await?;
        let handle = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if event.kind == kind {
                    callback(event);
                }
            }
        });
        Ok(Subscription { handle })
    }

    /// Worker pool with default worker options
    pub fn worker(&self, handler: impl JobHandler) -> Worker {
        Worker::new(self.clone(), Arc::new(handler), WorkerOptions::default())
    }

    pub fn worker_with(&self, handler: impl JobHandler, options: WorkerOptions) -> QueueResult<Worker> {
        options.validate()?;
        Ok(Worker::new(self.clone(), Arc::new(handler), options))
    }

    pub fn scheduler(&self, options: SchedulerOptions) -> Scheduler {
        Scheduler::new(self.clone(), options)
    }

    pub fn stall_monitor(&self, options: StallMonitorOptions) -> StallMonitor {
        StallMonitor::new(self.clone(), options)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish()
    }
}

/// Event callback registration; stops when dropped
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.handle.abort();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
