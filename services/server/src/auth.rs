use crate::state::AppState;
use crate::store::StoreError;
use crate::validate;
use axum::http::HeaderMap;

/// The resolved identity behind a presented API key.
pub struct AuthedKey {
    pub uid: String,
    pub pattern: Option<String>,
}

/// Pull raw key material out of an `Authorization` header.  Accepted schemes
/// are `bearer` and `apikey`, case-insensitive; anything else -- missing
/// header, other schemes, wrong token count -- is simply unauthenticated.
pub fn extract_credentials(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    let scheme = parts.next()?;
    let credentials = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if !scheme.eq_ignore_ascii_case("bearer") && !scheme.eq_ignore_ascii_case("apikey") {
        return None;
    }
    Some(credentials)
}

/// Resolve request headers to a key record.  `Ok(None)` is the normal
/// unauthenticated outcome; `Err` is a store failure and surfaces as a 500.
pub async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Option<AuthedKey>, StoreError> {
    let Some(raw_key) = extract_credentials(headers) else {
        return Ok(None);
    };
    if validate::validate_key(raw_key).is_some() {
        return Ok(None);
    }
    match state.keys.get_key(raw_key).await? {
        Some(key) => Ok(Some(AuthedKey {
            uid: key.uid,
            pattern: key.pattern,
        })),
        None => Ok(None),
    }
}
