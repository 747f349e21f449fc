// Shape checks for caller-supplied fields.  Each validator returns `None`
// when the value is acceptable or a short user-facing diagnostic.  These run
// at the edge of every endpoint before any store access.

const MAX_KEY_LEN: usize = 50;
const MIN_KEY_LEN: usize = 5;
const MAX_NAME_LEN: usize = 1024;
const MIN_REQUEST_ID_LEN: usize = 6;

/// Raw API key material as presented in an `Authorization` header.
pub fn validate_key(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        return Some("key is required");
    }
    if value.len() > MAX_KEY_LEN {
        return Some("key is too long");
    }
    if value.len() < MIN_KEY_LEN {
        return Some("key is too short");
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Some("key has invalid format");
    }
    None
}

/// Key identifiers are uuid-like: hex digits and dashes.
pub fn validate_key_id(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        return Some("key id is required");
    }
    if value.len() > MAX_KEY_LEN {
        return Some("key id is too long");
    }
    if value.len() < MIN_KEY_LEN {
        return Some("key id is too short");
    }
    if !value.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return Some("key id has invalid format");
    }
    None
}

pub fn validate_key_name(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        return Some("key name is required");
    }
    if value.len() > MAX_NAME_LEN {
        return Some("key name is too long");
    }
    None
}

pub fn validate_cue_name(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        return Some("cue name is required");
    }
    if value.len() > MAX_NAME_LEN {
        return Some("cue name is too long");
    }
    None
}

pub fn validate_cue_pattern(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        return Some("cue pattern is required");
    }
    if value.len() > MAX_NAME_LEN {
        return Some("cue pattern is too long");
    }
    None
}

/// Provisioning request ids are short alphanumeric tokens.  The shape check
/// runs before any store lookup as a cheap defense against id scanning.
pub fn valid_request_id(value: &str) -> bool {
    value.len() >= MIN_REQUEST_ID_LEN && value.chars().all(|c| c.is_ascii_alphanumeric())
}
