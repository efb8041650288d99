use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Backoff, JobId, JobState, LockToken, NewJob};
use crate::codec::Payload;

/// Job record - runtime state stored by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job identifier within the queue
    pub id: JobId,

    /// Owning queue
    pub queue: String,

    /// Job name used for handler dispatch
    pub name: String,

    /// Opaque payload
    pub payload: Payload,

    /// Lower value is claimed first
    pub priority: u32,

    /// Current lifecycle state
    pub state: JobState,

    /// Attempts that reached an outcome (completed or failed)
    pub attempts_made: u32,

    /// Claims taken, including ones that later stalled
    pub attempts_started: u32,

    /// Total attempts before the job fails
    pub max_attempts: u32,

    /// Delay policy between attempts
    pub backoff: Option<Backoff>,

    /// Due time while delayed or waiting out a retry
    pub delay_until: Option<DateTime<Utc>>,

    /// Repeatable definition that produced this job
    pub repeat_key: Option<String>,

    /// Current lock token; set only while active
    pub lock_token: Option<LockToken>,

    /// When the current lock lapses
    pub lock_expires_at: Option<DateTime<Utc>>,

    /// Times the job was reclaimed after its lock lapsed
    pub stalled_count: u32,

    /// Last progress reported by the handler
    #[serde(default)]
    pub progress: serde_json::Value,

    pub created_at: DateTime<Utc>,

    /// When the current or last attempt was claimed
    pub processed_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,

    /// Reason of the last failed attempt
    pub failed_reason: Option<String>,

    /// Handler output on completion
    pub return_value: Option<serde_json::Value>,

    /// Store-assigned insertion sequence, FIFO within a priority tier
    pub seq: u64,
}

impl JobRecord {
    /// Create the record for a new submission
    pub fn new(id: JobId, job: NewJob, seq: u64, now: DateTime<Utc>) -> Self {
        let state = if job.is_delayed(now) { JobState::Delayed } else { JobState::Waiting };
        Self {
            id,
            queue: job.queue,
            name: job.name,
            payload: job.payload,
            priority: job.priority,
            state,
            attempts_made: 0,
            attempts_started: 0,
            max_attempts: job.max_attempts,
            backoff: job.backoff,
            delay_until: job.delay_until.filter(|_| state == JobState::Delayed),
            repeat_key: job.repeat_key,
            lock_token: None,
            lock_expires_at: None,
            stalled_count: 0,
            progress: serde_json::Value::Null,
            created_at: now,
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            return_value: None,
            seq,
        }
    }

    /// Whether another attempt is allowed after the current one failed
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Check if the lock has lapsed
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lock_expires_at.is_some_and(|at| at < now)
    }

    /// Check the presented token against the current lock
    pub fn holds_lock(&self, token: &LockToken) -> bool {
        self.state == JobState::Active && self.lock_token.as_ref() == Some(token)
    }
}

/// A job claimed by a worker
#[derive(Debug, Clone)]
pub struct LeasedJob {
    /// Record as of the claim
    pub record: JobRecord,

    /// Lock token proving the claim
    pub token: LockToken,

    /// When the lock lapses unless renewed
    pub lock_expires_at: DateTime<Utc>,
}

impl LeasedJob {
    pub fn new(record: JobRecord, token: LockToken, lock_expires_at: DateTime<Utc>) -> Self {
        Self { record, token, lock_expires_at }
    }

    /// Get the job ID
    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    /// Get the time remaining on the lock
    pub fn lock_remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.lock_expires_at - now
    }
}

/// Number of jobs per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    /// Delayed plus retry-wait
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    /// Jobs not yet in a terminal state
    pub fn pending(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }

    pub fn total(&self) -> u64 {
        self.pending() + self.completed + self.failed
    }
}
