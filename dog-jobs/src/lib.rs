//! # dog-jobs: Background Job Processing
//!
//! Asynchronous job queue and worker engine: priority queues, delayed and
//! repeatable jobs, retries with backoff, rate limiting, stalled-job recovery
//! and lifecycle events.
//!
//! Delivery is at-least-once: a job whose worker dies is reclaimed once its
//! lease lapses and may run again, so handlers should be idempotent.
//!
//! ## Features
//!
//! - **Atomic store transitions**: every state change is one lock scope in
//!   memory or one Lua script in Redis, safe across processes
//! - **Lease tokens**: late results from a reclaimed job are rejected
//! - **Priorities**: lower value first, FIFO within a priority
//! - **Delayed, retried and repeatable jobs**: promoted by any number of schedulers
//! - **Shared rate limits**: checked inside the claim itself
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_jobs::prelude::*;
//! use std::time::Duration;
//!
//! # async fn run() -> QueueResult<()> {
//! let engine = QueueEngine::new(MemoryBackend::new());
//! let queue = engine.queue(
//!     "emails",
//!     QueueOptions::default()
//!         .with_concurrency(4)
//!         .with_default_job_options(
//!             JobOptions::new()
//!                 .with_max_attempts(3)
//!                 .with_backoff(Backoff::exponential(Duration::from_secs(1))),
//!         ),
//! )?;
//!
//! queue
//!     .add_json(&serde_json::json!({ "to": "ada@example.com" }), JobOptions::new())
//!     .await?;
//!
//! let worker = queue
//!     .worker(handler_fn(|ctx: JobContext| async move {
//!         let email: serde_json::Value = ctx.decode_json()?;
//!         ctx.update_progress(serde_json::json!({ "sent": false }))
//!             .await
//!             .map_err(|e| JobError::retryable(e.to_string()))?;
//!         Ok::<_, JobError>(email)
//!     }))
//!     .start();
//!
//! let scheduler = queue.scheduler(SchedulerOptions::default()).spawn();
//! let monitor = queue.stall_monitor(StallMonitorOptions::default()).spawn();
//!
//! worker.shutdown().await?;
//! scheduler.abort();
//! monitor.abort();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod bus;
pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod observability;
pub mod queue;
pub mod rate_limit;
pub mod scheduler;
pub mod stall;
pub mod types;
pub mod worker;

// Core API exports
pub use backend::QueueBackend;
pub use bus::{EventBus, LocalEventBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{JsonCodec, Payload, PayloadCodec};
pub use config::{EngineConfig, QueueOptions, Retention, SchedulerOptions, StallMonitorOptions, WorkerOptions};
pub use engine::QueueEngine;
pub use error::{JobError, QueueError, QueueResult};
pub use job::{handler_fn, JobContext, JobHandler, JobRegistry, JobResult};
pub use queue::{Queue, Subscription};
pub use rate_limit::RateLimit;
pub use scheduler::repeat::{RepeatSchedule, RepeatableDefinition, RepeatableState};
pub use scheduler::{Scheduler, SchedulerTick};
pub use stall::StallMonitor;
pub use types::{
    Backoff, EventKind, JobCounts, JobEvent, JobId, JobOptions, JobRecord, JobState, LeasedJob, LockToken,
    NewJob, MAX_PRIORITY,
};
pub use worker::{Processed, Worker, WorkerHandle};

// Observability exports
pub use observability::LiveMetrics;

// Backend implementations
#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;

#[cfg(feature = "redis")]
pub use bus::RedisEventBus;

#[cfg(feature = "metrics")]
pub use observability::PrometheusExporter;

/// Everything needed to produce and process jobs
pub mod prelude {
    // Core engine and handles
    pub use crate::{Queue, QueueBackend, QueueEngine, Scheduler, StallMonitor, Worker, WorkerHandle};

    // Essential types
    pub use crate::{
        Backoff, EventKind, JobEvent, JobId, JobOptions, JobRecord, JobState, Payload, RepeatSchedule,
        RepeatableDefinition,
    };

    // Handlers
    pub use crate::{handler_fn, JobContext, JobError, JobHandler, JobRegistry, JobResult};

    // Options and errors
    pub use crate::{QueueError, QueueOptions, QueueResult, SchedulerOptions, StallMonitorOptions, WorkerOptions};

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;

    #[cfg(feature = "redis")]
    pub use crate::RedisBackend;

    // Essential traits
    pub use async_trait::async_trait;
}
