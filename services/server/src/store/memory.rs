// In-memory key store.  Single-process only: used by the test suites and by
// deployments that run one server instance without Redis.  TTL expiry is
// enforced lazily at read time.

use super::{
    hash_key, mint_key, mint_request_id, ApiKey, KeyGrant, KeyRequest, KeyStore, StoreError,
    REQUEST_TTL,
};
use crate::validate::valid_request_id;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

struct PendingRequest {
    expires_at: Instant,
    request: KeyRequest,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<String, PendingRequest>,
    keys_by_hash: HashMap<String, ApiKey>,
    keys_by_id: HashMap<String, ApiKey>,
    user_keys: HashMap<String, BTreeSet<String>>,
}

pub struct MemoryKeyStore {
    inner: Mutex<Inner>,
    request_ttl: Duration,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::with_request_ttl(REQUEST_TTL)
    }

    /// Tests use a short TTL to exercise expiry.
    pub fn with_request_ttl(request_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            request_ttl,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn start_key_request(
        &self,
        name: &str,
        pattern: Option<&str>,
    ) -> Result<KeyGrant, StoreError> {
        let key = mint_key();
        let request = KeyRequest {
            key_id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            pattern: pattern.map(str::to_owned),
            hash: hash_key(&key),
        };
        let mut inner = self.lock();
        let request_id = loop {
            let candidate = mint_request_id();
            if !inner.requests.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.requests.insert(
            request_id.clone(),
            PendingRequest {
                expires_at: Instant::now() + self.request_ttl,
                request,
            },
        );
        Ok(KeyGrant { request_id, key })
    }

    async fn find_key_request(&self, request_id: &str) -> Result<Option<KeyRequest>, StoreError> {
        if !valid_request_id(request_id) {
            return Ok(None);
        }
        let mut inner = self.lock();
        match inner.requests.get(request_id) {
            Some(pending) if pending.expires_at > Instant::now() => {
                Ok(Some(pending.request.clone()))
            }
            Some(_) => {
                inner.requests.remove(request_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn redeem_key_request(
        &self,
        request_id: &str,
        uid: &str,
        name: &str,
    ) -> Result<(), StoreError> {
        if !valid_request_id(request_id) {
            return Err(StoreError::NotFound);
        }
        let mut inner = self.lock();
        // Consuming the request under the lock makes a second redeem
        // impossible, matching the Redis backend's GETDEL.
        let pending = inner.requests.remove(request_id).ok_or(StoreError::NotFound)?;
        if pending.expires_at <= Instant::now() {
            return Err(StoreError::NotFound);
        }
        let request = pending.request;
        let record = ApiKey {
            id: request.key_id,
            uid: uid.to_owned(),
            name: name.to_owned(),
            pattern: request.pattern,
            created_at: Utc::now(),
            hash: request.hash,
        };
        inner
            .keys_by_hash
            .insert(record.hash.clone(), record.clone());
        inner.keys_by_id.insert(record.id.clone(), record.clone());
        inner
            .user_keys
            .entry(record.uid.clone())
            .or_default()
            .insert(record.id);
        Ok(())
    }

    async fn get_key(&self, raw_key: &str) -> Result<Option<ApiKey>, StoreError> {
        let hash = hash_key(raw_key);
        Ok(self.lock().keys_by_hash.get(&hash).cloned())
    }

    async fn find_user_keys(&self, uid: &str) -> Result<Vec<ApiKey>, StoreError> {
        let inner = self.lock();
        let Some(ids) = inner.user_keys.get(uid) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.keys_by_id.get(id).cloned())
            .collect())
    }

    async fn remove_key(&self, key_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let record = inner.keys_by_id.remove(key_id).ok_or(StoreError::NotFound)?;
        inner.keys_by_hash.remove(&record.hash);
        if let Some(ids) = inner.user_keys.get_mut(&record.uid) {
            ids.remove(key_id);
            if ids.is_empty() {
                inner.user_keys.remove(&record.uid);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_key_resolves_only_after_redemption() {
        let store = MemoryKeyStore::new();
        let grant = store.start_key_request("laptop", None).await.unwrap();

        assert!(store.get_key(&grant.key).await.unwrap().is_none());

        store
            .redeem_key_request(&grant.request_id, "auth0|u1", "laptop")
            .await
            .unwrap();

        let key = store.get_key(&grant.key).await.unwrap().expect("key record");
        assert_eq!(key.uid, "auth0|u1");
        assert_eq!(key.name, "laptop");
        assert_eq!(key.pattern, None);
        assert_eq!(key.hash, hash_key(&grant.key));
    }

    #[tokio::test]
    async fn second_redemption_fails_not_found() {
        let store = MemoryKeyStore::new();
        let grant = store.start_key_request("laptop", None).await.unwrap();

        store
            .redeem_key_request(&grant.request_id, "auth0|u1", "laptop")
            .await
            .unwrap();
        let second = store
            .redeem_key_request(&grant.request_id, "auth0|u2", "other")
            .await;
        assert!(matches!(second, Err(StoreError::NotFound)));

        // The first redemption's binding is untouched.
        let key = store.get_key(&grant.key).await.unwrap().expect("key record");
        assert_eq!(key.uid, "auth0|u1");
    }

    #[tokio::test]
    async fn redeem_overrides_name_but_preserves_pattern() {
        let store = MemoryKeyStore::new();
        let grant = store
            .start_key_request("requested-name", Some("test.*"))
            .await
            .unwrap();

        store
            .redeem_key_request(&grant.request_id, "auth0|u1", "approved-name")
            .await
            .unwrap();

        let key = store.get_key(&grant.key).await.unwrap().expect("key record");
        assert_eq!(key.name, "approved-name");
        assert_eq!(key.pattern.as_deref(), Some("test.*"));
    }

    #[tokio::test]
    async fn expired_requests_are_gone() {
        let store = MemoryKeyStore::with_request_ttl(Duration::ZERO);
        let grant = store.start_key_request("laptop", None).await.unwrap();

        assert!(store
            .find_key_request(&grant.request_id)
            .await
            .unwrap()
            .is_none());
        let redeem = store
            .redeem_key_request(&grant.request_id, "auth0|u1", "laptop")
            .await;
        assert!(matches!(redeem, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn malformed_request_id_is_rejected_without_lookup() {
        let store = MemoryKeyStore::new();
        assert!(store.find_key_request("ab!").await.unwrap().is_none());
        let redeem = store.redeem_key_request("ab!", "auth0|u1", "x").await;
        assert!(matches!(redeem, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn user_key_listing_and_removal_are_mirrored() {
        let store = MemoryKeyStore::new();
        let g1 = store.start_key_request("laptop", None).await.unwrap();
        let g2 = store.start_key_request("desktop", None).await.unwrap();
        store
            .redeem_key_request(&g1.request_id, "auth0|u1", "laptop")
            .await
            .unwrap();
        store
            .redeem_key_request(&g2.request_id, "auth0|u1", "desktop")
            .await
            .unwrap();

        let mut names: Vec<String> = store
            .find_user_keys("auth0|u1")
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["desktop".to_owned(), "laptop".to_owned()]);

        let laptop_id = store
            .get_key(&g1.key)
            .await
            .unwrap()
            .expect("key record")
            .id;
        store.remove_key(&laptop_id).await.unwrap();

        assert!(store.get_key(&g1.key).await.unwrap().is_none());
        let remaining = store.find_user_keys("auth0|u1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "desktop");

        assert!(matches!(
            store.remove_key(&laptop_id).await,
            Err(StoreError::NotFound)
        ));
    }
}
