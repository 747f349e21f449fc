// The dispatcher: one task per server process that consumes the cue topic
// and fans each cue out to the matching listener sessions of its owner.
//
// Bus errors never reach HTTP callers -- the loop logs, sleeps a beat, and
// re-subscribes.  Delivery failures never stop sibling deliveries: a full or
// closed session channel evicts that one session and moves on.

use crate::bus::CUES_TOPIC;
use crate::state::AppState;
use cue_protocol::BusCue;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Handle to the running dispatch task.  Created at server start, shut down
/// at server stop; shutdown cancels the loop and waits for it to finish.
pub struct Dispatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(state: AppState) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(state, token.clone()));
        Self { token, handle }
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

async fn run(state: AppState, token: CancellationToken) {
    loop {
        match state.bus.subscribe(CUES_TOPIC).await {
            Ok(mut subscription) => {
                info!("dispatcher subscribed to cue topic");
                loop {
                    let payload = tokio::select! {
                        () = token.cancelled() => return,
                        payload = subscription.next_payload() => payload,
                    };
                    match payload {
                        Ok(Some(text)) => match serde_json::from_str::<BusCue>(&text) {
                            Ok(cue) => dispatch_cue(&state, &cue).await,
                            Err(e) => warn!(error = %e, "dropping undecodable cue payload"),
                        },
                        Ok(None) => {
                            warn!("cue subscription ended, re-subscribing");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "cue subscription error, re-subscribing");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to subscribe to cue topic"),
        }
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(RETRY_DELAY) => {}
        }
    }
}

/// Deliver one cue to every matching session of its owner.
///
/// Sends go through the per-session channels, so one slow or dead socket
/// cannot stall another.  Eviction happens after the read guard is dropped;
/// the evicted session's listen loop observes its channel closing and tears
/// the socket down.
pub(crate) async fn dispatch_cue(state: &AppState, cue: &BusCue) {
    let mut dead: Vec<Uuid> = Vec::new();
    {
        let registry = state.listeners.read().await;
        let Some(sessions) = registry.get(&cue.uid) else {
            return;
        };
        for (session_id, entry) in sessions {
            let matches = entry.matching_names(&cue.names);
            if matches.is_empty() {
                continue;
            }
            match entry.tx.try_send(cue.frame(matches)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(uid = %cue.uid, session_id = %session_id, "listener too slow, evicting");
                    dead.push(*session_id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(uid = %cue.uid, session_id = %session_id, "listener channel closed");
                    dead.push(*session_id);
                }
            }
        }
    }
    for session_id in dead {
        state.unregister_listener(&cue.uid, session_id).await;
    }
}
