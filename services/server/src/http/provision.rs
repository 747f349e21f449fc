// Key-provisioning API: the unauthenticated request mint and the poll
// endpoint a CLI spins on until its key is approved from a browser.

use crate::auth;
use crate::http::response::{bad_request, internal_error, ok_message, unauthorized};
use crate::pattern::CuePattern;
use crate::state::AppState;
use crate::validate;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{error, info};

pub async fn homepage() -> Response {
    ok_message("This is the cue api")
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub name: String,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// `POST /api/auth` -- mint a key and park it behind a request id.  The raw
/// key goes back to the caller once and is never stored or logged.
pub async fn post_auth(
    State(state): State<AppState>,
    Json(body): Json<AuthRequest>,
) -> Response {
    if let Some(err) = validate::validate_key_name(&body.name) {
        return bad_request(err);
    }
    if let Some(pattern) = body.pattern.as_deref() {
        if let Some(err) = validate::validate_cue_pattern(pattern) {
            return bad_request(err);
        }
        if CuePattern::compile(pattern).is_err() {
            return bad_request("cue pattern has invalid format");
        }
    }

    match state
        .keys
        .start_key_request(&body.name, body.pattern.as_deref())
        .await
    {
        Ok(grant) => {
            info!(request_id = %grant.request_id, "key request created");
            Json(serde_json::json!({
                "id": grant.request_id,
                "key": grant.key,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to create key request");
            internal_error(e)
        }
    }
}

/// `GET /api/hello` -- 401 until the presented key has been redeemed; the
/// provisioning CLI polls this to learn its key went live.
pub async fn get_hello(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match auth::authenticate(&state, &headers).await {
        Ok(Some(_)) => ok_message("Hello!"),
        Ok(None) => unauthorized(),
        Err(e) => {
            error!(error = %e, "key lookup failed during hello");
            internal_error(e)
        }
    }
}
