use crate::JobId;

/// Key layout of one queue.
///
/// The queue name sits in a hash tag so every key of a queue maps to the same
/// cluster slot and multi-key scripts stay legal.
#[derive(Debug, Clone)]
pub(crate) struct QueueKeys {
    base: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, queue: &str) -> Self {
        Self { base: format!("{}:{{{}}}", prefix, queue) }
    }

    /// Prefix scripts append a job ID to
    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.base)
    }

    pub fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.base, id)
    }

    pub fn wait(&self) -> String {
        format!("{}:wait", self.base)
    }

    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.base)
    }

    pub fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }

    pub fn failed(&self) -> String {
        format!("{}:failed", self.base)
    }

    pub fn seq(&self) -> String {
        format!("{}:seq", self.base)
    }

    pub fn limiter(&self) -> String {
        format!("{}:limiter", self.base)
    }

    pub fn repeat(&self) -> String {
        format!("{}:repeat", self.base)
    }

    pub fn repeat_spec(&self) -> String {
        format!("{}:repeat:spec", self.base)
    }

    pub fn repeat_last(&self) -> String {
        format!("{}:repeat:last", self.base)
    }

    pub fn repeat_count(&self) -> String {
        format!("{}:repeat:count", self.base)
    }

    /// Pub/sub channel for lifecycle events
    pub fn events(&self) -> String {
        format!("{}:events", self.base)
    }
}
