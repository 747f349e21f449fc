// Listen endpoint.  A listener holds one WebSocket carrying all of its
// subscription patterns; the socket task only writes frames queued by the
// dispatcher and reads solely to notice the peer going away.

use crate::auth;
use crate::http::names_from_query;
use crate::http::response::{bad_request, internal_error};
use crate::pattern::CuePattern;
use crate::state::{AppState, ListenerEntry, SESSION_BUFFER};
use crate::validate;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

/// Hard cap on patterns per connection.
pub const MAX_PATTERNS: usize = 128;

pub async fn listen_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let key = match auth::authenticate(&state, &headers).await {
        Ok(Some(key)) => key,
        // Auth failures complete the upgrade and close with a policy
        // violation, so clients can tell a bad key from a flaky network.
        Ok(None) => return ws.on_upgrade(close_policy_violation).into_response(),
        Err(e) => {
            error!(error = %e, "key lookup failed during listen");
            return internal_error(e);
        }
    };

    let requested = names_from_query(query.as_deref());
    if requested.is_empty() {
        return bad_request("No cue names requested");
    }
    if requested.len() > MAX_PATTERNS {
        return bad_request("Too many cue names requested");
    }
    let mut patterns = Vec::with_capacity(requested.len());
    for raw in &requested {
        if let Some(err) = validate::validate_cue_pattern(raw) {
            return bad_request(err);
        }
        match CuePattern::compile(raw) {
            Ok(pattern) => patterns.push(pattern),
            Err(_) => return bad_request("cue pattern has invalid format"),
        }
    }
    let key_pattern = match key.pattern.as_deref().map(CuePattern::compile) {
        None => None,
        Some(Ok(pattern)) => Some(pattern),
        // A key whose stored pattern no longer compiles cannot be scoped,
        // so it gets the same policy close as a bad key.
        Some(Err(_)) => return ws.on_upgrade(close_policy_violation).into_response(),
    };

    ws.on_upgrade(move |socket| run_listener(socket, state, key.uid, patterns, key_pattern))
        .into_response()
}

async fn close_policy_violation(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "Unauthorized".into(),
        })))
        .await;
}

async fn run_listener(
    mut socket: WebSocket,
    state: AppState,
    uid: String,
    patterns: Vec<CuePattern>,
    key_pattern: Option<CuePattern>,
) {
    let session_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel(SESSION_BUFFER);
    state
        .register_listener(
            &uid,
            session_id,
            ListenerEntry {
                patterns,
                key_pattern,
                tx,
            },
        )
        .await;
    info!(%uid, %session_id, "listener connected");

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    let Ok(json) = serde_json::to_string(&frame) else { continue };
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                // The dispatcher evicted this session (too slow); closing
                // the socket tells the client to reconnect.
                None => break,
            },
            inbound = socket.recv() => match inbound {
                // Inbound frames are consumed and discarded; they only prove
                // the peer is alive.  Pings are answered at protocol level.
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    state.unregister_listener(&uid, session_id).await;
    info!(%uid, %session_id, "listener disconnected");
}
