use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tracing::warn;

use super::EventBus;
use crate::{
    backend::{redis::QueueKeys, BoxStream},
    config::DEFAULT_KEY_PREFIX,
    JobEvent, QueueResult,
};

/// Cross-process bus on Redis pub/sub, one channel per queue
#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    conn: ConnectionManager,
    prefix: String,
}

impl RedisEventBus {
    pub async fn connect(redis_url: &str) -> QueueResult<Self> {
        Self::connect_with_prefix(redis_url, DEFAULT_KEY_PREFIX).await
    }

    pub async fn connect_with_prefix(redis_url: &str, prefix: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn, prefix: prefix.to_string() })
    }

    fn channel(&self, queue: &str) -> String {
        QueueKeys::new(&self.prefix, queue).events()
    }
}

impl std::fmt::Debug for RedisEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventBus").field("prefix", &self.prefix).finish()
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: JobEvent) {
        let message = match serde_json::to_string(&event) {
            Ok(message) => message,
            Err(e) => {
                warn!(job_id = %event.job_id, "Failed to encode event: {}", e);
                return;
            }
        };

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<i64> = redis::cmd("PUBLISH")
            .arg(self.channel(&event.queue))
            .arg(message)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(job_id = %event.job_id, kind = %event.kind, "Failed to publish event: {}", e);
        }
    }

    async fn subscribe(&self, queue: &str) -> QueueResult<BoxStream<JobEvent>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(self.channel(queue)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }
}
