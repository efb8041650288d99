use serde::{Deserialize, Serialize};

/// Job lifecycle states
///
/// `stalled` is not a resting state: the stall monitor moves a reclaimed job
/// straight to `Waiting` or `Failed` and reports the stall as an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    /// Ready to be claimed
    Waiting,

    /// Waiting for `delay_until` before becoming ready
    Delayed,

    /// Claimed by a worker holding the lock token
    Active,

    /// Failed with a retryable error, waiting out its backoff
    RetryWait,

    /// Handler succeeded
    Completed,

    /// Fatal error, retries exhausted or stalled too often
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state (completed or failed)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the job sits in the delayed set (plain delay or retry backoff)
    pub fn is_scheduled(self) -> bool {
        matches!(self, Self::Delayed | Self::RetryWait)
    }

    /// Get the state name as a string
    pub fn name(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::RetryWait => "retry-wait",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "delayed" => Ok(Self::Delayed),
            "active" => Ok(Self::Active),
            "retry-wait" => Ok(Self::RetryWait),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names_round_trip() {
        for state in [
            JobState::Waiting,
            JobState::Delayed,
            JobState::Active,
            JobState::RetryWait,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.name().parse::<JobState>().unwrap(), state);
        }
        assert!("stalled".parse::<JobState>().is_err());
    }

    #[test]
    fn test_state_serializes_kebab_case() {
        let json = serde_json::to_string(&JobState::RetryWait).unwrap();
        assert_eq!(json, "\"retry-wait\"");
    }

    #[test]
    fn test_terminal_and_scheduled() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(JobState::RetryWait.is_scheduled());
        assert!(!JobState::Waiting.is_scheduled());
    }
}
