use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{JobContext, JobHandler, JobResult};
use crate::{JobError, QueueError, QueueResult};

/// Dispatches jobs to handlers by job name
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a job name
    pub fn register(&mut self, name: impl Into<String>, handler: impl JobHandler) -> QueueResult<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(QueueError::InvalidOptions(format!("job name '{}' already registered", name)));
        }
        self.handlers.insert(name, Arc::new(handler));
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, name: impl Into<String>, handler: impl JobHandler) -> QueueResult<Self> {
        self.register(name, handler)?;
        Ok(self)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl JobHandler for JobRegistry {
    async fn handle(&self, ctx: JobContext) -> JobResult {
        let handler = self
            .handlers
            .get(ctx.name())
            .cloned()
            .ok_or_else(|| JobError::fatal(format!("no handler registered for job '{}'", ctx.name())))?;

        handler.handle(ctx).await
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("names", &self.registered_names())
            .finish()
    }
}
