// Publish endpoint.  Checks run strictly at the edge: authenticate, validate
// names, enforce the producer key's pattern, cap the body, then hand the cue
// to the event bus.  A 200 means the bus accepted it, nothing more.

use crate::auth;
use crate::bus::CUES_TOPIC;
use crate::http::response::{bad_request, internal_error, ok_message, unauthorized};
use crate::http::{names_from_query, response};
use crate::pattern::CuePattern;
use crate::state::AppState;
use crate::validate;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cue_protocol::BusCue;
use std::collections::BTreeSet;
use tracing::{debug, error};

/// Largest accepted publish body.
pub const MAX_CUE_BODY: usize = 512 * 1024;

pub async fn post_cues(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let names = names_from_query(query.as_deref());
    publish(&state, &headers, names, &body).await
}

/// Path-parametrized convenience: `POST /api/cues/{name}` publishes that one
/// name with the same body handling.
pub async fn post_cue_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    publish(&state, &headers, BTreeSet::from([name]), &body).await
}

async fn publish(
    state: &AppState,
    headers: &HeaderMap,
    names: BTreeSet<String>,
    body: &[u8],
) -> Response {
    let key = match auth::authenticate(state, headers).await {
        Ok(Some(key)) => key,
        Ok(None) => return unauthorized(),
        Err(e) => {
            error!(error = %e, "key lookup failed during publish");
            return internal_error(e);
        }
    };

    for name in &names {
        if let Some(err) = validate::validate_cue_name(name) {
            return bad_request(err);
        }
    }
    if names.is_empty() {
        return bad_request("No cue names requested");
    }

    if let Some(pattern) = key.pattern.as_deref() {
        let denied = denied_names(&names, pattern);
        if !denied.is_empty() {
            return response::message(
                StatusCode::UNAUTHORIZED,
                format!("Key is not permitted to post cues: {}", denied.join(", ")),
            );
        }
    }

    if body.len() > MAX_CUE_BODY {
        return bad_request("Cue content is too large");
    }
    let content = if body.is_empty() {
        None
    } else {
        Some(STANDARD.encode(body))
    };

    let cue = BusCue::new(key.uid, names, content);
    let payload = match serde_json::to_string(&cue) {
        Ok(payload) => payload,
        Err(e) => return internal_error(e),
    };
    match state.bus.publish(CUES_TOPIC, &payload).await {
        Ok(()) => {
            debug!(id = %cue.id, uid = %cue.uid, "cue published");
            ok_message("Posted")
        }
        Err(e) => {
            error!(error = %e, "cue publish failed");
            internal_error(e)
        }
    }
}

/// The names a producer pattern does not cover, in sorted order.  A stored
/// pattern that no longer compiles denies everything.
fn denied_names(names: &BTreeSet<String>, pattern: &str) -> Vec<String> {
    match CuePattern::compile(pattern) {
        Ok(pattern) => names
            .iter()
            .filter(|name| !pattern.is_match(name))
            .cloned()
            .collect(),
        Err(_) => names.iter().cloned().collect(),
    }
}
