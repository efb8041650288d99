use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    backend::QueueBackend,
    bus::{EventBus, LocalEventBus},
    clock::{Clock, SystemClock},
    config::QueueOptions,
    observability::LiveMetrics,
    queue::Queue,
    JobEvent, QueueError, QueueResult,
};

/// Shared handles behind every queue, worker, scheduler and stall monitor.
///
/// Cloning is cheap; all clones share the same backend, bus, clock and
/// metrics.
#[derive(Clone)]
pub struct QueueEngine {
    backend: Arc<dyn QueueBackend>,
    events: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    metrics: Arc<LiveMetrics>,
}

impl QueueEngine {
    /// Engine with an in-process event bus and the system clock
    pub fn new(backend: impl QueueBackend + 'static) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    pub fn from_shared(backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            backend,
            events: Arc::new(LocalEventBus::new()),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(LiveMetrics::new()),
        }
    }

    /// Connect backend and event bus to the Redis server in `config`
    #[cfg(feature = "redis")]
    pub async fn connect(config: &crate::config::EngineConfig) -> QueueResult<Self> {
        let backend = crate::backend::redis::RedisBackend::connect_with_prefix(&config.redis_url, &config.key_prefix).await?;
        let events = crate::bus::RedisEventBus::connect_with_prefix(&config.redis_url, &config.key_prefix).await?;
        Ok(Self::new(backend).with_event_bus(events))
    }

    pub fn with_event_bus(mut self, events: impl EventBus + 'static) -> Self {
        self.events = Arc::new(events);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<LiveMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Handle on a named queue with options fixed for its lifetime
    pub fn queue(&self, name: impl Into<String>, options: QueueOptions) -> QueueResult<Queue> {
        let name = name.into();
        if name.is_empty() || name.contains(['{', '}']) {
            return Err(QueueError::InvalidOptions(format!("invalid queue name '{}'", name)));
        }
        options.validate()?;
        Ok(Queue::new(self.clone(), name, options))
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn publish(&self, event: JobEvent) {
        self.events.publish(event).await;
    }
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine").field("clock", &self.clock).finish()
    }
}
