// Browser-facing key management: approving a pending key request from a
// signed-in session, listing keys, and revoking them.
//
// Sign-in itself (OIDC, cookies) is not this server's business: an outer
// session middleware authenticates the browser and installs a `WebSession`
// request extension carrying the acting uid and the session's CSRF token.
// Every mutating route checks the submitted CSRF token against the session.

use crate::http::response::{
    bad_request, forbidden, internal_error, not_found, ok_message, unauthorized,
};
use crate::state::AppState;
use crate::store::StoreError;
use crate::validate;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Form, Json};
use serde::Deserialize;
use tracing::{error, info, warn};

/// Installed by the session middleware for authenticated browsers.
#[derive(Debug, Clone)]
pub struct WebSession {
    pub uid: String,
    pub csrf: String,
}

const CSRF_FAILED: &str = "Failed. Please try again.";

fn csrf_ok(session: &WebSession, submitted: &str) -> bool {
    session.csrf == submitted
}

/// `GET /keyrequest/{request_id}` -- what the confirmation page renders.
pub async fn get_key_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    session: Option<Extension<WebSession>>,
) -> Response {
    if session.is_none() {
        return unauthorized();
    }
    match state.keys.find_key_request(&request_id).await {
        Ok(Some(request)) => Json(serde_json::json!({
            "id": request_id,
            "name": request.name,
            "pattern": request.pattern,
        }))
        .into_response(),
        Ok(None) => not_found("Unknown key request"),
        Err(e) => {
            error!(error = %e, "key request lookup failed");
            internal_error(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AcceptForm {
    #[serde(default)]
    pub name: String,
    pub csrf: String,
}

/// `POST /keyrequest/{request_id}/accept` -- bind the pending key to the
/// session user.  The submitted name wins; a blank one falls back to the
/// name captured when the request was created.
pub async fn accept_key_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    session: Option<Extension<WebSession>>,
    Form(form): Form<AcceptForm>,
) -> Response {
    let Some(Extension(session)) = session else {
        return unauthorized();
    };
    if !csrf_ok(&session, &form.csrf) {
        warn!(%request_id, "csrf mismatch on key approval");
        return forbidden(CSRF_FAILED);
    }

    let name = if form.name.trim().is_empty() {
        match state.keys.find_key_request(&request_id).await {
            Ok(Some(request)) => request.name,
            Ok(None) => return not_found("Unknown key request"),
            Err(e) => return internal_error(e),
        }
    } else {
        form.name
    };
    if let Some(err) = validate::validate_key_name(&name) {
        return bad_request(err);
    }

    match state
        .keys
        .redeem_key_request(&request_id, &session.uid, &name)
        .await
    {
        Ok(()) => {
            info!(%request_id, uid = %session.uid, "key request approved");
            ok_message("Key approved")
        }
        Err(StoreError::NotFound) => not_found("Unknown key request"),
        Err(e) => {
            error!(error = %e, "key redemption failed");
            internal_error(e)
        }
    }
}

/// `GET /keys` -- the session user's keys.  Hashes never leave the store.
pub async fn list_keys(
    State(state): State<AppState>,
    session: Option<Extension<WebSession>>,
) -> Response {
    let Some(Extension(session)) = session else {
        return unauthorized();
    };
    match state.keys.find_user_keys(&session.uid).await {
        Ok(keys) => {
            let keys: Vec<serde_json::Value> = keys
                .into_iter()
                .map(|k| {
                    serde_json::json!({
                        "id": k.id,
                        "name": k.name,
                        "pattern": k.pattern,
                        "created_at": k.created_at.to_rfc3339(),
                    })
                })
                .collect();
            Json(serde_json::json!({ "keys": keys })).into_response()
        }
        Err(e) => {
            error!(error = %e, "key listing failed");
            internal_error(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RemoveForm {
    pub csrf: String,
}

/// `POST /keys/{key_id}/remove` -- revoke one of the session user's keys.
pub async fn remove_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
    session: Option<Extension<WebSession>>,
    Form(form): Form<RemoveForm>,
) -> Response {
    let Some(Extension(session)) = session else {
        return unauthorized();
    };
    if !csrf_ok(&session, &form.csrf) {
        warn!(%key_id, "csrf mismatch on key removal");
        return forbidden(CSRF_FAILED);
    }
    if let Some(err) = validate::validate_key_id(&key_id) {
        return bad_request(err);
    }

    // Only keys the session user owns are removable; anything else reads as
    // nonexistent.
    let owned = match state.keys.find_user_keys(&session.uid).await {
        Ok(keys) => keys.into_iter().any(|k| k.id == key_id),
        Err(e) => return internal_error(e),
    };
    if !owned {
        return not_found("Key not found");
    }

    match state.keys.remove_key(&key_id).await {
        Ok(()) => {
            info!(%key_id, uid = %session.uid, "key removed");
            ok_message("Key removed")
        }
        Err(StoreError::NotFound) => not_found("Key not found"),
        Err(e) => {
            error!(error = %e, "key removal failed");
            internal_error(e)
        }
    }
}
