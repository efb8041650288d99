use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Backoff, JobId, JobOptions, DEFAULT_JOB_NAME, MAX_PRIORITY, REPEAT_ID_PREFIX};
use crate::{clock, codec::Payload, QueueError, QueueResult};

/// Validated job submission, ready to be written by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Target queue name
    pub queue: String,

    /// Job name used for handler dispatch
    pub name: String,

    /// Opaque payload
    pub payload: Payload,

    /// Caller-chosen ID; the backend generates one when unset
    pub job_id: Option<JobId>,

    /// Lower value is claimed first
    pub priority: u32,

    /// Total attempts, at least 1
    pub max_attempts: u32,

    /// Delay policy between attempts
    pub backoff: Option<Backoff>,

    /// Job starts `delayed` until this instant
    pub delay_until: Option<DateTime<Utc>>,

    /// Repeatable definition that produced this job
    pub repeat_key: Option<String>,
}

impl NewJob {
    /// Build a submission from merged options, rejecting invalid values
    pub fn from_options(
        queue: impl Into<String>,
        payload: Payload,
        options: &JobOptions,
        now: DateTime<Utc>,
    ) -> QueueResult<Self> {
        let priority = options.priority.unwrap_or(0);
        if priority > MAX_PRIORITY {
            return Err(QueueError::InvalidOptions(format!(
                "priority {} exceeds maximum {}",
                priority, MAX_PRIORITY
            )));
        }

        let job_id = match options.job_id.as_deref() {
            None => None,
            Some("") => {
                return Err(QueueError::InvalidOptions("job_id must not be empty".to_string()))
            }
            Some(id) => {
                let id = JobId::from(id);
                if id.is_occurrence() {
                    return Err(QueueError::InvalidOptions(format!(
                        "job_id prefix '{}' is reserved for repeatable jobs",
                        REPEAT_ID_PREFIX
                    )));
                }
                Some(id)
            }
        };

        let delay_until = options
            .delay
            .filter(|delay| !delay.is_zero())
            .map(|delay| clock::after(now, delay));

        Ok(Self {
            queue: queue.into(),
            name: options.name.clone().unwrap_or_else(|| DEFAULT_JOB_NAME.to_string()),
            payload,
            job_id,
            priority,
            max_attempts: options.max_attempts.unwrap_or(1).max(1),
            backoff: options.backoff,
            delay_until,
            repeat_key: None,
        })
    }

    /// Whether the job enters the delayed set instead of waiting
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.delay_until.is_some_and(|at| at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payload() -> Payload {
        Payload::json(&serde_json::json!({"user": 7})).unwrap()
    }

    #[test]
    fn test_defaults_are_applied() {
        let now = Utc::now();
        let job = NewJob::from_options("emails", payload(), &JobOptions::new(), now).unwrap();
        assert_eq!(job.name, DEFAULT_JOB_NAME);
        assert_eq!(job.priority, 0);
        assert_eq!(job.max_attempts, 1);
        assert!(job.delay_until.is_none());
        assert!(!job.is_delayed(now));
    }

    #[test]
    fn test_zero_attempts_normalized() {
        let options = JobOptions::new().with_max_attempts(0);
        let job = NewJob::from_options("emails", payload(), &options, Utc::now()).unwrap();
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn test_delay_sets_due_time() {
        let now = Utc::now();
        let options = JobOptions::new().with_delay(Duration::from_secs(5));
        let job = NewJob::from_options("emails", payload(), &options, now).unwrap();
        assert_eq!(job.delay_until, Some(now + chrono::Duration::seconds(5)));
        assert!(job.is_delayed(now));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let now = Utc::now();
        let too_high = JobOptions::new().with_priority(MAX_PRIORITY + 1);
        assert!(matches!(
            NewJob::from_options("q", payload(), &too_high, now),
            Err(QueueError::InvalidOptions(_))
        ));

        let reserved = JobOptions::new().with_job_id("repeat:digest:1");
        assert!(NewJob::from_options("q", payload(), &reserved, now).is_err());

        let empty = JobOptions::new().with_job_id("");
        assert!(NewJob::from_options("q", payload(), &empty, now).is_err());
    }
}
