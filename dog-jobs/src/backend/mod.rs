#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::{
    config::Retention,
    rate_limit::RateLimit,
    scheduler::repeat::{RepeatableDefinition, RepeatableState},
    JobCounts, JobId, JobRecord, JobState, LeasedJob, LockToken, NewJob, QueueResult,
};

/// Reason recorded when a job exceeds its stall allowance
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Result of adding a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    pub id: JobId,

    /// False when the ID already existed and nothing changed
    pub created: bool,

    /// State of the job after the call
    pub state: JobState,
}

/// Parameters of a claim
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest {
    /// Lock duration granted to the claimer
    pub lease: Duration,

    /// Queue-wide rate limit checked inside the claim
    pub rate_limit: Option<RateLimit>,
}

/// Result of a claim
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(LeasedJob),
    Empty,
    RateLimited { retry_after: Duration },
}

/// Result of settling a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// In retry-wait until `at`
    Retrying { at: DateTime<Utc> },

    /// Retry was already due and the job went straight back to waiting
    Requeued,

    /// Moved to the failed archive
    Failed,
}

/// A job reclaimed after its lock lapsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledJob {
    pub id: JobId,
    pub stalled_count: u32,

    /// `Waiting` or `Failed`
    pub state: JobState,
}

/// A job moved from the delayed set to waiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotedJob {
    pub id: JobId,

    /// `Delayed` or `RetryWait`
    pub from: JobState,
}

/// Shared store primitives.
///
/// Every method is one atomic transition: implementations must never expose
/// a partially applied change to another caller. Timestamps always come from
/// the caller's clock.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Insert a job as waiting or delayed; an existing ID is returned unchanged
    async fn add(&self, job: NewJob, now: DateTime<Utc>) -> QueueResult<AddOutcome>;

    /// Insert several jobs in order; each entry succeeds or fails on its own
    async fn add_bulk(&self, jobs: Vec<NewJob>, now: DateTime<Utc>) -> Vec<QueueResult<AddOutcome>> {
        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            results.push(self.add(job, now).await);
        }
        results
    }

    /// Check the rate limit and claim the lowest `(priority, seq)` waiting job
    async fn claim(&self, queue: &str, request: ClaimRequest, now: DateTime<Utc>) -> QueueResult<ClaimOutcome>;

    /// Renew the lock; fails with `LockMismatch` if the token is stale
    async fn extend_lock(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> QueueResult<DateTime<Utc>>;

    /// Store handler progress
    async fn update_progress(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        progress: serde_json::Value,
    ) -> QueueResult<()>;

    /// Move an active job to the completed archive
    async fn complete(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        output: serde_json::Value,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<()>;

    /// Record a failed attempt; retries only when `retry_at` is set and attempts remain
    async fn fail(
        &self,
        queue: &str,
        id: &JobId,
        token: &LockToken,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
        retention: &Retention,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome>;

    /// Move due delayed and retry-wait jobs to waiting
    async fn promote_delayed(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<PromotedJob>>;

    /// Reclaim active jobs whose lock lapsed before `now`
    async fn recover_stalled(
        &self,
        queue: &str,
        max_stalled_count: u32,
        retention: &Retention,
        now: DateTime<Utc>,
        limit: usize,
    ) -> QueueResult<Vec<StalledJob>>;

    /// Delete a job that is not active; `false` if it did not exist
    async fn remove(&self, queue: &str, id: &JobId) -> QueueResult<bool>;

    /// Move a failed job back to waiting with its attempts reset
    async fn retry_failed(&self, queue: &str, id: &JobId, now: DateTime<Utc>) -> QueueResult<()>;

    /// Make a delayed or retry-wait job due immediately
    async fn promote(&self, queue: &str, id: &JobId) -> QueueResult<()>;

    async fn get_job(&self, queue: &str, id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Jobs in a state; waiting in claim order, others oldest first.
    /// `Delayed` also lists retry-wait jobs.
    async fn list_jobs(&self, queue: &str, state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>>;

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts>;

    /// Register a repeatable definition; `false` if an identical one exists
    async fn upsert_repeatable(&self, definition: &RepeatableDefinition) -> QueueResult<bool>;

    /// Delete a repeatable definition; already materialized jobs stay
    async fn remove_repeatable(&self, queue: &str, name: &str) -> QueueResult<bool>;

    async fn repeatables(&self, queue: &str) -> QueueResult<Vec<RepeatableState>>;

    /// Insert the occurrence at `fire_at` and advance the definition's anchor.
    ///
    /// Returns `None` when another caller already materialized it, when the
    /// definition changed or was removed, or when its limit is reached.
    async fn materialize_occurrence(
        &self,
        definition: &RepeatableDefinition,
        fire_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<JobId>>;
}
