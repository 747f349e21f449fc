// Key Store: API keys and pending key-provisioning requests.
//
// The store is the only durable state the server owns.  Two backends exist:
// Redis for production (shared across the fleet) and an in-memory store for
// tests and single-process deployments.  Both uphold the same contract:
// a request id redeems at most once, and the `keyhash:{h}` / `apikey:{id}`
// records are written and deleted as mirrors.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryKeyStore;
pub use self::redis::RedisKeyStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// How long a pending key request stays redeemable.
pub const REQUEST_TTL: Duration = Duration::from_secs(300);

const KEY_LEN: usize = 32;
const REQUEST_ID_LEN: usize = 20;

/// A provisioned API key as stored by the server.  The raw key material is
/// never part of this record; only its hash is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub uid: String,
    pub name: String,
    pub pattern: Option<String>,
    pub created_at: DateTime<Utc>,
    pub hash: String,
}

/// A pending key request awaiting browser approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key_id: String,
    pub name: String,
    pub pattern: Option<String>,
    pub hash: String,
}

/// What `start_key_request` hands back to the caller.  `key` is shown to the
/// client exactly once and forgotten server-side.
#[derive(Debug, Clone)]
pub struct KeyGrant {
    pub request_id: String,
    pub key: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("key store backend error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for StoreError {
    fn from(err: ::redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Mint a key and park it as a pending request under a fresh request id.
    async fn start_key_request(
        &self,
        name: &str,
        pattern: Option<&str>,
    ) -> Result<KeyGrant, StoreError>;

    /// Look up a pending request without consuming it.  Returns `None` for
    /// unknown, expired, or malformed ids.
    async fn find_key_request(&self, request_id: &str) -> Result<Option<KeyRequest>, StoreError>;

    /// Consume a pending request and write the key record, bound to `uid`.
    /// The `name` given here overrides the one captured at request time.
    /// A second redemption of the same id fails with `StoreError::NotFound`.
    async fn redeem_key_request(
        &self,
        request_id: &str,
        uid: &str,
        name: &str,
    ) -> Result<(), StoreError>;

    /// Resolve raw key material to its record, or `None` if unknown.
    async fn get_key(&self, raw_key: &str) -> Result<Option<ApiKey>, StoreError>;

    /// All keys owned by a user.  Ids that resolve to no record are treated
    /// as already deleted and skipped.
    async fn find_user_keys(&self, uid: &str) -> Result<Vec<ApiKey>, StoreError>;

    /// Delete a key record and its mirrors.  Unknown id ⇒ `NotFound`.
    async fn remove_key(&self, key_id: &str) -> Result<(), StoreError>;
}

/// Lowercase hex SHA-256 of raw key material; the only form the server keeps.
pub fn hash_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Fresh key material: 32 alphanumeric chars (~190 bits) from the OS RNG.
pub(crate) fn mint_key() -> String {
    random_alphanumeric(KEY_LEN)
}

/// Request ids are shorter since they are typed into a browser, but still
/// random enough that collisions are retried rather than avoided.
pub(crate) fn mint_request_id() -> String {
    random_alphanumeric(REQUEST_ID_LEN)
}

fn random_alphanumeric(len: usize) -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
