// Event Bus: the cross-process channel carrying published cues to every
// server instance's dispatcher.  The bus is transient by design -- no
// durability, no replay -- so the contract is just topic publish plus a
// subscribable stream of payloads.

pub mod local;
pub mod redis;

pub use self::local::LocalBus;
pub use self::redis::RedisBus;

use async_trait::async_trait;
use thiserror::Error;

/// The single topic all cues travel on.
pub const CUES_TOPIC: &str = "cues";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for BusError {
    fn from(err: ::redis::RedisError) -> Self {
        BusError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Hand a payload to the bus.  Success means accepted by the broker,
    /// not received by anyone.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError>;

    /// Open a subscription on `topic`.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn BusSubscription>, BusError>;
}

#[async_trait]
pub trait BusSubscription: Send {
    /// The next payload, `Ok(None)` when the subscription has ended and the
    /// caller should re-subscribe.
    async fn next_payload(&mut self) -> Result<Option<String>, BusError>;
}
