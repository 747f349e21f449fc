use crate::bus::EventBus;
use crate::pattern::CuePattern;
use crate::store::KeyStore;
use cue_protocol::CueFrame;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Outbound frames queued per listener session before its socket writer
/// drains them.  A session that falls this far behind is evicted.
pub const SESSION_BUFFER: usize = 64;

pub type SharedKeyStore = Arc<dyn KeyStore>;
pub type SharedBus = Arc<dyn EventBus>;

/// One connected listener: its subscription patterns, the producer-side
/// pattern of the key it authenticated with, and the writer handle its
/// socket task drains.
pub struct ListenerEntry {
    pub patterns: Vec<CuePattern>,
    pub key_pattern: Option<CuePattern>,
    pub tx: mpsc::Sender<CueFrame>,
}

impl ListenerEntry {
    /// The subset of `names` this session should receive: the key's pattern
    /// must allow the name (revoked-but-connected keys keep their scope) and
    /// at least one subscription pattern must match it.  Input order is
    /// preserved, so sorted names stay sorted.
    pub fn matching_names(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| {
                self.key_pattern
                    .as_ref()
                    .is_none_or(|kp| kp.is_match(name))
                    && self.patterns.iter().any(|p| p.is_match(name))
            })
            .cloned()
            .collect()
    }
}

type ListenerRegistry = Arc<RwLock<HashMap<String, HashMap<Uuid, ListenerEntry>>>>;

#[derive(Clone)]
pub struct AppState {
    pub keys: SharedKeyStore,
    pub bus: SharedBus,
    pub(crate) listeners: ListenerRegistry,
}

impl AppState {
    pub fn new(keys: SharedKeyStore, bus: SharedBus) -> Self {
        Self {
            keys,
            bus,
            listeners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register_listener(&self, uid: &str, session_id: Uuid, entry: ListenerEntry) {
        self.listeners
            .write()
            .await
            .entry(uid.to_owned())
            .or_default()
            .insert(session_id, entry);
    }

    /// Idempotent removal; prunes the user's bucket when it empties.
    pub async fn unregister_listener(&self, uid: &str, session_id: Uuid) {
        let mut registry = self.listeners.write().await;
        if let Some(sessions) = registry.get_mut(uid) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                registry.remove(uid);
            }
        }
    }

    pub async fn listener_count(&self, uid: &str) -> usize {
        self.listeners
            .read()
            .await
            .get(uid)
            .map_or(0, HashMap::len)
    }

    pub async fn has_listener_bucket(&self, uid: &str) -> bool {
        self.listeners.read().await.contains_key(uid)
    }
}
