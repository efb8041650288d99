use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Lifecycle event kinds published on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Waiting,
    Delayed,
    Active,
    Progress,
    Completed,
    Retrying,
    Failed,
    Stalled,
    Removed,
}

impl EventKind {
    /// Get event type name as string
    pub fn name(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Progress => "progress",
            Self::Completed => "completed",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Stalled => "stalled",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Job lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub queue: String,
    pub kind: EventKind,

    /// Kind-specific details (progress value, return value, failure reason)
    #[serde(default)]
    pub payload: serde_json::Value,

    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(
        queue: impl Into<String>,
        job_id: JobId,
        kind: EventKind,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            queue: queue.into(),
            kind,
            payload: serde_json::Value::Null,
            at,
        }
    }

    /// Attach kind-specific details
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
