use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::{rate_limit::RateLimit, types::JobOptions, QueueError, QueueResult};

/// Default key prefix for shared stores
pub const DEFAULT_KEY_PREFIX: &str = "dog";

/// How many finished jobs an archive keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Retention {
    /// Keep at most this many of the newest jobs
    pub count: Option<usize>,

    /// Drop jobs finished longer ago than this
    pub age: Option<Duration>,
}

impl Retention {
    /// Never trim
    pub fn keep_all() -> Self {
        Self::default()
    }

    /// Keep the newest `count` jobs
    pub fn keep_last(count: usize) -> Self {
        Self { count: Some(count), age: None }
    }

    /// Keep jobs finished within `age`
    pub fn keep_for(age: Duration) -> Self {
        Self { count: None, age: Some(age) }
    }

    /// Jobs finished before this instant are trimmed
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.age.map(|age| {
            now.checked_sub_signed(crate::clock::to_chrono(age))
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }
}

/// Per-queue options, fixed when the queue handle is created
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Slots per worker pool instance
    pub concurrency: usize,

    /// Claim rate shared by every worker of the queue
    pub rate_limit: Option<RateLimit>,

    /// Options applied to jobs that do not set their own
    pub default_job_options: JobOptions,

    /// Completed archive retention
    pub keep_completed: Retention,

    /// Failed archive retention
    pub keep_failed: Retention,

    /// Stalls tolerated before a job fails
    pub max_stalled_count: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_limit: None,
            default_job_options: JobOptions::default(),
            keep_completed: Retention::keep_last(1000),
            keep_failed: Retention::keep_last(5000),
            max_stalled_count: 1,
        }
    }
}

impl QueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker slots
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Limit claims across all workers
    pub fn with_rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimit::new(max, window));
        self
    }

    /// Set the default job options
    pub fn with_default_job_options(mut self, options: JobOptions) -> Self {
        self.default_job_options = options;
        self
    }

    /// Set the completed archive retention
    pub fn with_keep_completed(mut self, retention: Retention) -> Self {
        self.keep_completed = retention;
        self
    }

    /// Set the failed archive retention
    pub fn with_keep_failed(mut self, retention: Retention) -> Self {
        self.keep_failed = retention;
        self
    }

    /// Set the number of stalls tolerated before a job fails
    pub fn with_max_stalled_count(mut self, max_stalled_count: u32) -> Self {
        self.max_stalled_count = max_stalled_count;
        self
    }

    /// Reject options no worker could honour
    pub fn validate(&self) -> QueueResult<()> {
        if self.concurrency == 0 {
            return Err(QueueError::InvalidOptions("concurrency must be at least 1".to_string()));
        }
        if let Some(limit) = &self.rate_limit {
            if limit.max == 0 || limit.window.is_zero() {
                return Err(QueueError::InvalidOptions(
                    "rate limit needs a positive max and window".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Queue options from `DOG_JOBS_*` variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let rate_limit = match (
            env_parse::<u32>("DOG_JOBS_RATE_LIMIT_MAX"),
            env_parse::<u64>("DOG_JOBS_RATE_LIMIT_WINDOW_MS"),
        ) {
            (Some(max), Some(window_ms)) => Some(RateLimit::new(max, Duration::from_millis(window_ms))),
            _ => None,
        };
        Self {
            concurrency: env_parse("DOG_JOBS_CONCURRENCY").unwrap_or(defaults.concurrency),
            rate_limit,
            default_job_options: JobOptions {
                max_attempts: env_parse("DOG_JOBS_MAX_ATTEMPTS"),
                ..JobOptions::default()
            },
            keep_completed: env_parse("DOG_JOBS_KEEP_COMPLETED")
                .map(Retention::keep_last)
                .unwrap_or(defaults.keep_completed),
            keep_failed: env_parse("DOG_JOBS_KEEP_FAILED")
                .map(Retention::keep_last)
                .unwrap_or(defaults.keep_failed),
            max_stalled_count: env_parse("DOG_JOBS_MAX_STALLED_COUNT")
                .unwrap_or(defaults.max_stalled_count),
        }
    }
}

/// Worker pool timing
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Lock duration granted by each claim and renewal
    pub lease_duration: Duration,

    /// Renewal period; must be shorter than the lease
    pub heartbeat_interval: Duration,

    /// First idle sleep when the queue is empty
    pub poll_interval: Duration,

    /// Longest idle sleep
    pub max_poll_interval: Duration,

    /// First sleep after a store error
    pub infra_retry_backoff: Duration,

    /// Longest sleep after repeated store errors
    pub max_infra_retry_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        let lease_duration = Duration::from_secs(30);
        Self {
            lease_duration,
            heartbeat_interval: lease_duration / 2,
            poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(5),
            infra_retry_backoff: Duration::from_millis(500),
            max_infra_retry_backoff: Duration::from_secs(30),
        }
    }
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lease and reset the heartbeat to half of it
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self.heartbeat_interval = lease / 2;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the idle polling bounds
    pub fn with_poll_interval(mut self, min: Duration, max: Duration) -> Self {
        self.poll_interval = min;
        self.max_poll_interval = max;
        self
    }

    /// Set the store error backoff bounds
    pub fn with_infra_retry_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.infra_retry_backoff = min;
        self.max_infra_retry_backoff = max;
        self
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.lease_duration.is_zero() {
            return Err(QueueError::InvalidOptions("lease duration must be positive".to_string()));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.lease_duration {
            return Err(QueueError::InvalidOptions(format!(
                "heartbeat interval {:?} must be positive and shorter than the lease {:?}",
                self.heartbeat_interval, self.lease_duration
            )));
        }
        if self.poll_interval.is_zero() || self.poll_interval > self.max_poll_interval {
            return Err(QueueError::InvalidOptions("invalid poll interval bounds".to_string()));
        }
        if self.infra_retry_backoff.is_zero() || self.infra_retry_backoff > self.max_infra_retry_backoff {
            return Err(QueueError::InvalidOptions("invalid store retry backoff bounds".to_string()));
        }
        Ok(())
    }

    /// Worker options from `DOG_JOBS_*` variables
    pub fn from_env() -> Self {
        let defaults = match env_parse::<u64>("DOG_JOBS_LEASE_DURATION_MS") {
            Some(ms) => Self::default().with_lease_duration(Duration::from_millis(ms)),
            None => Self::default(),
        };
        Self {
            heartbeat_interval: env_duration_ms("DOG_JOBS_HEARTBEAT_INTERVAL_MS")
                .unwrap_or(defaults.heartbeat_interval),
            poll_interval: env_duration_ms("DOG_JOBS_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            max_poll_interval: env_duration_ms("DOG_JOBS_MAX_POLL_INTERVAL_MS")
                .unwrap_or(defaults.max_poll_interval),
            ..defaults
        }
    }
}

/// Scheduler timing
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Tick period
    pub interval: Duration,

    /// Due jobs promoted per tick
    pub promote_batch: usize,

    /// Occurrences materialized per definition per tick
    pub max_catch_up: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            promote_batch: 1000,
            max_catch_up: 100,
        }
    }
}

impl SchedulerOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_duration_ms("DOG_JOBS_SCHEDULER_INTERVAL_MS").unwrap_or(defaults.interval),
            ..defaults
        }
    }
}

/// Stall monitor timing
#[derive(Debug, Clone)]
pub struct StallMonitorOptions {
    /// Check period
    pub interval: Duration,

    /// Active jobs inspected per check
    pub batch: usize,
}

impl Default for StallMonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch: 1000,
        }
    }
}

impl StallMonitorOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval: env_duration_ms("DOG_JOBS_STALL_INTERVAL_MS").unwrap_or(defaults.interval),
            ..defaults
        }
    }
}

/// Process-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shared store URL, used by the Redis backend and event bus
    pub redis_url: String,

    /// Key namespace in the shared store
    pub key_prefix: String,

    pub queue: QueueOptions,
    pub worker: WorkerOptions,
    pub scheduler: SchedulerOptions,
    pub stall_monitor: StallMonitorOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            queue: QueueOptions::default(),
            worker: WorkerOptions::default(),
            scheduler: SchedulerOptions::default(),
            stall_monitor: StallMonitorOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("DOG_JOBS_REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("DOG_JOBS_KEY_PREFIX")
                .unwrap_or_else(|_| DEFAULT_KEY_PREFIX.to_string()),
            queue: QueueOptions::from_env(),
            worker: WorkerOptions::from_env(),
            scheduler: SchedulerOptions::from_env(),
            stall_monitor: StallMonitorOptions::from_env(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_duration_ms(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
