// In-process event bus on a tokio broadcast channel.  Gives a single-process
// deployment (and the test suites) the same publish/subscribe surface the
// Redis bus provides to a fleet.

use super::{BusError, BusSubscription, EventBus};
use async_trait::async_trait;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

pub struct LocalBus {
    tx: broadcast::Sender<(String, String)>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        // A send with no subscribers is a successfully published cue that
        // nobody was listening for.
        let _ = self.tx.send((topic.to_owned(), payload.to_owned()));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        Ok(Box::new(LocalSubscription {
            rx: self.tx.subscribe(),
            topic: topic.to_owned(),
        }))
    }
}

struct LocalSubscription {
    rx: broadcast::Receiver<(String, String)>,
    topic: String,
}

#[async_trait]
impl BusSubscription for LocalSubscription {
    async fn next_payload(&mut self) -> Result<Option<String>, BusError> {
        loop {
            match self.rx.recv().await {
                Ok((topic, payload)) if topic == self.topic => return Ok(Some(payload)),
                Ok(_) => continue,
                // Lagging just drops the missed cues; delivery is best-effort.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
