use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::trace;

use super::EventBus;
use crate::{backend::BoxStream, JobEvent, QueueResult};

const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus on a tokio broadcast channel.
///
/// Slow subscribers that fall behind the channel capacity skip the events
/// they missed.
#[derive(Debug, Clone)]
pub struct LocalEventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    async fn publish(&self, event: JobEvent) {
        // No receivers is not an error
        if self.sender.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }

    async fn subscribe(&self, queue: &str) -> QueueResult<BoxStream<JobEvent>> {
        let queue = queue.to_string();
        let stream = BroadcastStream::new(self.sender.subscribe())
            .filter_map(|result| result.ok())
            .filter(move |event| event.queue == queue);

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventKind, JobId};
    use chrono::Utc;

    #[tokio::test]
    async fn test_subscribe_filters_by_queue() {
        let bus = LocalEventBus::new();
        let mut stream = bus.subscribe("emails").await.unwrap();

        bus.publish(JobEvent::new("reports", JobId::from("r-1"), EventKind::Waiting, Utc::now()))
            .await;
        bus.publish(JobEvent::new("emails", JobId::from("e-1"), EventKind::Completed, Utc::now()))
            .await;

        let event = stream.next().await.unwrap();
        assert_eq!(event.job_id, JobId::from("e-1"));
        assert_eq!(event.kind, EventKind::Completed);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = LocalEventBus::with_capacity(1);
        bus.publish(JobEvent::new("emails", JobId::new(), EventKind::Waiting, Utc::now()))
            .await;
    }
}
