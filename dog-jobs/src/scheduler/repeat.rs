use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::{
    clock,
    codec::Payload,
    types::{JobId, JobOptions, NewJob},
    QueueError, QueueResult,
};

/// When a repeatable job fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepeatSchedule {
    /// Fixed interval counted from the definition's creation
    Every { interval_ms: u64 },

    /// Cron expression (5 fields, or 6-7 with seconds and year), UTC
    Cron { expression: String },
}

impl RepeatSchedule {
    pub fn every(interval: Duration) -> Self {
        Self::Every { interval_ms: interval.as_millis() as u64 }
    }

    /// Parse a cron expression, rejecting invalid ones up front
    pub fn cron(expression: impl Into<String>) -> QueueResult<Self> {
        let schedule = Self::Cron { expression: expression.into() };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> QueueResult<()> {
        match self {
            Self::Every { interval_ms: 0 } => {
                Err(QueueError::InvalidSchedule("interval must be positive".to_string()))
            }
            Self::Every { .. } => Ok(()),
            Self::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    /// First nominal fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> QueueResult<Option<DateTime<Utc>>> {
        match self {
            Self::Every { interval_ms } => {
                let interval = Duration::from_millis(*interval_ms);
                if interval.is_zero() {
                    return Err(QueueError::InvalidSchedule("interval must be positive".to_string()));
                }
                let next = clock::after(after, interval);
                Ok((next > after).then_some(next))
            }
            Self::Cron { expression } => Ok(parse_cron(expression)?.after(&after).next()),
        }
    }
}

/// Accept classic 5-field expressions by pinning seconds to zero
fn parse_cron(expression: &str) -> QueueResult<cron::Schedule> {
    let expression = expression.trim();
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression)
    } else {
        expression.to_string()
    };
    Ok(cron::Schedule::from_str(&normalized)?)
}

/// Job produced by each occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub payload: Payload,
    pub options: JobOptions,
}

/// Recurring job definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatableDefinition {
    pub queue: String,

    /// Unique within the queue; occurrence IDs derive from it
    pub name: String,

    pub schedule: RepeatSchedule,
    pub template: JobTemplate,

    /// Anchor used before the first occurrence; the engine clock at
    /// registration when unset
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Stop after this many occurrences
    pub limit: Option<u64>,

    /// No occurrences after this instant
    pub end_at: Option<DateTime<Utc>>,
}

impl RepeatableDefinition {
    pub fn new(name: impl Into<String>, schedule: RepeatSchedule, payload: Payload) -> Self {
        Self {
            queue: String::new(),
            name: name.into(),
            schedule,
            template: JobTemplate { payload, options: JobOptions::default() },
            created_at: None,
            limit: None,
            end_at: None,
        }
    }

    /// Set the options of every occurrence
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.template.options = options;
        self
    }

    /// Stop after `limit` occurrences
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Stop firing after `end_at`
    pub fn with_end_at(mut self, end_at: DateTime<Utc>) -> Self {
        self.end_at = Some(end_at);
        self
    }

    /// Anchor the schedule at an explicit instant
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Instant the schedule counts from before its first occurrence
    pub fn anchor(&self) -> QueueResult<DateTime<Utc>> {
        self.created_at.ok_or_else(|| {
            QueueError::InvalidSchedule(format!("repeatable {} has no anchor", self.name))
        })
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.name.is_empty() {
            return Err(QueueError::InvalidSchedule("repeatable name must not be empty".to_string()));
        }
        self.anchor()?;
        self.schedule.validate()
    }

    /// Identity used to detect re-registration of the same definition.
    ///
    /// `created_at` is excluded so that every process can register the
    /// definition at startup without resetting its anchor.
    pub fn fingerprint(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(&(
            &self.schedule,
            &self.template,
            &self.limit,
            &self.end_at,
        ))?)
    }

    /// Submission for the occurrence at `fire_at`
    pub fn occurrence(&self, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> QueueResult<NewJob> {
        let options = JobOptions {
            job_id: None,
            delay: None,
            ..self.template.options.clone()
        };
        let mut job = NewJob::from_options(&self.queue, self.template.payload.clone(), &options, now)?;
        job.job_id = Some(JobId::for_occurrence(&self.name, fire_at));
        job.repeat_key = Some(self.name.clone());
        Ok(job)
    }
}

/// Stored definition plus its expansion pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatableState {
    pub definition: RepeatableDefinition,

    /// Last materialized nominal fire time
    pub last_fire_at: Option<DateTime<Utc>>,

    /// Occurrences materialized so far
    pub materialized: u64,
}

impl RepeatableState {
    pub fn new(definition: RepeatableDefinition) -> Self {
        Self { definition, last_fire_at: None, materialized: 0 }
    }

    /// Fire times are generated strictly after this instant
    pub fn anchor(&self) -> QueueResult<DateTime<Utc>> {
        match self.last_fire_at {
            Some(last) => Ok(last),
            None => self.definition.anchor(),
        }
    }

    /// Whether the limit has been reached
    pub fn exhausted(&self) -> bool {
        self.definition.limit.is_some_and(|limit| self.materialized >= limit)
    }

    /// Nominal fire times in `(anchor, now]` that may still be materialized
    pub fn due_fire_times(&self, now: DateTime<Utc>, max: usize) -> QueueResult<Vec<DateTime<Utc>>> {
        let def = &self.definition;
        let remaining = def
            .limit
            .map_or(u64::MAX, |limit| limit.saturating_sub(self.materialized));
        let cap = (max as u64).min(remaining);

        let mut due = Vec::new();
        let mut cursor = self.anchor()?;
        while (due.len() as u64) < cap {
            let Some(next) = def.schedule.next_after(cursor)? else {
                break;
            };
            if next > now || def.end_at.is_some_and(|end| next > end) {
                break;
            }
            due.push(next);
            cursor = next;
        }
        Ok(due)
    }
}
