// Redis pub/sub event bus.  Publishes go through the shared multiplexed
// connection; each subscription holds its own dedicated pub/sub connection,
// as Redis requires.

use super::{BusError, BusSubscription, EventBus};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;

pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    pub fn new(client: redis::Client, conn: ConnectionManager) -> Self {
        Self { client, conn }
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        Ok(Box::new(RedisSubscription { pubsub }))
    }
}

struct RedisSubscription {
    pubsub: redis::aio::PubSub,
}

#[async_trait]
impl BusSubscription for RedisSubscription {
    async fn next_payload(&mut self) -> Result<Option<String>, BusError> {
        match self.pubsub.on_message().next().await {
            Some(msg) => Ok(Some(msg.get_payload()?)),
            None => Ok(None),
        }
    }
}
