use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The lock token no longer matches: the job was reclaimed or already settled
    #[error("Lock token mismatch for job {0}")]
    LockMismatch(String),

    #[error("Job {0} is active and cannot be modified")]
    JobActive(String),

    #[error("Invalid job options: {0}")]
    InvalidOptions(String),

    #[error("Invalid repeat schedule: {0}")]
    InvalidSchedule(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The queue's insertion sequence no longer fits below its priority tier
    #[error("Queue {0} has used up its insertion sequence")]
    SequenceExhausted(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Whether the error came from the shared store rather than the caller
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Internal(_))
    }
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Fatal error - fail immediately, no retry
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Fatal(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<cron::error::Error> for QueueError {
    fn from(err: cron::error::Error) -> Self {
        Self::InvalidSchedule(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_kinds() {
        let retry = JobError::retryable("smtp timeout");
        assert!(retry.is_retryable());
        assert_eq!(retry.message(), "smtp timeout");

        let fatal = JobError::fatal("bad address");
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.to_string(), "Fatal error: bad address");
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(QueueError::Backend("connection reset".into()).is_infrastructure());
        assert!(!QueueError::LockMismatch("job-1".into()).is_infrastructure());
    }
}
