// Redis-backed key store.  Records are JSON blobs; pending requests live
// under `key-rq:{request_id}` with a TTL, key records are mirror-written
// under `keyhash:{h}` and `apikey:{key_id}`, and `user:{uid}:apikeys` is a
// set of key ids.
//
// Redemption consumes the request with GETDEL, so exactly one of two racing
// approvals observes the record and the other fails with NotFound.

use super::{
    hash_key, mint_key, mint_request_id, ApiKey, KeyGrant, KeyRequest, KeyStore, StoreError,
    REQUEST_TTL,
};
use crate::validate::valid_request_id;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

fn request_key(request_id: &str) -> String {
    format!("key-rq:{request_id}")
}

fn keyhash_key(hash: &str) -> String {
    format!("keyhash:{hash}")
}

fn apikey_key(key_id: &str) -> String {
    format!("apikey:{key_id}")
}

fn user_keys_key(uid: &str) -> String {
    format!("user:{uid}:apikeys")
}

pub struct RedisKeyStore {
    conn: ConnectionManager,
}

impl RedisKeyStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KeyStore for RedisKeyStore {
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
        let json = serde_json::to_string(&request)?;

        let mut conn = self.conn.clone();
        loop {
            let request_id = mint_request_id();
            // Create-if-absent with TTL; a collision just draws a new id.
            let created: Option<String> = redis::cmd("SET")
                .arg(request_key(&request_id))
                .arg(&json)
                .arg("NX")
                .arg("EX")
                .arg(REQUEST_TTL.as_secs())
                .query_async(&mut conn)
                .await?;
            if created.is_some() {
                return Ok(KeyGrant { request_id, key });
            }
        }
    }

    async fn find_key_request(&self, request_id: &str) -> Result<Option<KeyRequest>, StoreError> {
        if !valid_request_id(request_id) {
            return Ok(None);
        }
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(request_key(request_id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
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
        let mut conn = self.conn.clone();
        let json: Option<String> = redis::cmd("GETDEL")
            .arg(request_key(request_id))
            .query_async(&mut conn)
            .await?;
        let request: KeyRequest = match json {
            Some(json) => serde_json::from_str(&json)?,
            None => return Err(StoreError::NotFound),
        };

        let record = ApiKey {
            id: request.key_id,
            uid: uid.to_owned(),
            name: name.to_owned(),
            pattern: request.pattern,
            created_at: Utc::now(),
            hash: request.hash,
        };
        let json = serde_json::to_string(&record)?;
        let _: () = redis::pipe()
            .atomic()
            .set(keyhash_key(&record.hash), &json)
            .ignore()
            .set(apikey_key(&record.id), &json)
            .ignore()
            .sadd(user_keys_key(uid), &record.id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_key(&self, raw_key: &str) -> Result<Option<ApiKey>, StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(keyhash_key(&hash_key(raw_key))).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn find_user_keys(&self, uid: &str) -> Result<Vec<ApiKey>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(user_keys_key(uid)).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let record_keys: Vec<String> = ids.iter().map(|id| apikey_key(id)).collect();
        let blobs: Vec<Option<String>> = conn.mget(record_keys).await?;
        let mut keys = Vec::with_capacity(blobs.len());
        for json in blobs.into_iter().flatten() {
            // A missing mirror means the key was deleted; skip it.
            keys.push(serde_json::from_str(&json)?);
        }
        Ok(keys)
    }

    async fn remove_key(&self, key_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(apikey_key(key_id)).await?;
        let record: ApiKey = match json {
            Some(json) => serde_json::from_str(&json)?,
            None => return Err(StoreError::NotFound),
        };
        let _: () = redis::pipe()
            .atomic()
            .del(keyhash_key(&record.hash))
            .ignore()
            .del(apikey_key(key_id))
            .ignore()
            .srem(user_keys_key(&record.uid), key_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
