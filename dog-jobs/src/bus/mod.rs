//! Lifecycle event bus.
//!
//! Publishing is fire-and-forget: a lost notification never affects job
//! state, so bus failures are logged and swallowed. Subscribers only see
//! events published while they are subscribed.

mod local;
#[cfg(feature = "redis")]
mod redis;

pub use local::LocalEventBus;
#[cfg(feature = "redis")]
pub use self::redis::RedisEventBus;

use async_trait::async_trait;

use crate::{backend::BoxStream, JobEvent, QueueResult};

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event; never fails the caller
    async fn publish(&self, event: JobEvent);

    /// Stream of events of one queue
    async fn subscribe(&self, queue: &str) -> QueueResult<BoxStream<JobEvent>>;
}
