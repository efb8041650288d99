use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Highest accepted priority value.
///
/// Priorities are packed with the insertion sequence into a single sorted-set
/// score (`priority * 2^32 + seq`), which must stay below 2^53. The sequence
/// gets the low 32 bits, so the Redis store takes at most `2^32 - 1` inserts
/// per queue and then rejects adds with [`QueueError::SequenceExhausted`].
///
/// [`QueueError::SequenceExhausted`]: crate::QueueError::SequenceExhausted
pub const MAX_PRIORITY: u32 = 2_097_151;

/// Default job name used when the producer does not set one
pub const DEFAULT_JOB_NAME: &str = "default";

/// Delay policy between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Constant delay between attempts
    Fixed { delay_ms: u64 },

    /// `base * 2^(attempts_made - 1)`, optionally capped
    Exponential { base_ms: u64, max_ms: Option<u64> },
}

impl Backoff {
    /// Constant delay between attempts
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay_ms: delay.as_millis() as u64 }
    }

    /// Doubling delay starting at `base`
    pub fn exponential(base: Duration) -> Self {
        Self::Exponential { base_ms: base.as_millis() as u64, max_ms: None }
    }

    /// Cap an exponential backoff; no effect on fixed backoff
    pub fn with_max(self, max: Duration) -> Self {
        match self {
            Self::Exponential { base_ms, .. } => Self::Exponential {
                base_ms,
                max_ms: Some(max.as_millis() as u64),
            },
            fixed => fixed,
        }
    }

    /// Delay to wait after the given number of failed attempts
    pub fn compute(&self, attempts_made: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { base_ms, max_ms } => {
                let exponent = attempts_made.max(1) - 1;
                let factor = 2_u64.checked_pow(exponent).unwrap_or(u64::MAX);
                let delay = base_ms.saturating_mul(factor);
                let delay = max_ms.map_or(delay, |max| delay.min(max));
                Duration::from_millis(delay)
            }
        }
    }
}

/// Per-job options; unset fields fall back to the queue's defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Job name used for handler dispatch
    pub name: Option<String>,

    /// Caller-chosen job ID; adding an existing ID is a no-op
    pub job_id: Option<String>,

    /// Lower value is claimed first
    pub priority: Option<u32>,

    /// Hold the job in `delayed` for this long
    pub delay: Option<Duration>,

    /// Total attempts before the job fails
    pub max_attempts: Option<u32>,

    /// Delay policy between attempts
    pub backoff: Option<Backoff>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the job name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set an explicit job ID
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    /// Set the job priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Delay the job
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the retry backoff
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Fill unset fields from `defaults`
    pub fn merged_with(&self, defaults: &JobOptions) -> JobOptions {
        JobOptions {
            name: self.name.clone().or_else(|| defaults.name.clone()),
            // IDs are per job and never inherited
            job_id: self.job_id.clone(),
            priority: self.priority.or(defaults.priority),
            delay: self.delay.or(defaults.delay),
            max_attempts: self.max_attempts.or(defaults.max_attempts),
            backoff: self.backoff.or(defaults.backoff),
        }
    }
}
