// src/core/keys/registry.rs

//! Hash-indexed API-key registry over the state store.
//!
//! Layout under the configured prefix:
//!   `{prefix}:hash:{sha256hex}` -> key id
//!   `{prefix}:key:{key_id}`     -> JSON record
//!   `{prefix}:index`            -> set of key ids
//!
//! Validation is a two-step dereference (hash index, then record); any
//! missing link means the key does not authenticate. Store failures
//! propagate so callers fail closed.

use crate::core::ProxyError;
use crate::core::hash::sha256_hex;
use crate::core::keys::types::{ApiConsumer, ApiKeyRecord, CreateKeyRequest};
use crate::core::store::StateStore;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use std::sync::Arc;
use tracing::warn;

/// Recognizable prefix on every issued key, so a leaked credential can be
/// attributed at a glance.
const RAW_KEY_PREFIX: &str = "sk_";

/// Bytes of entropy behind each key.
const RAW_KEY_ENTROPY_BYTES: usize = 32;

pub struct KeyRegistry {
    store: Arc<dyn StateStore>,
    prefix: String,
}

impl KeyRegistry {
    pub fn new(store: Arc<dyn StateStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    fn record_key(&self, key_id: &str) -> String {
        format!("{}:key:{}", self.prefix, key_id)
    }

    fn hash_index_key(&self, hash: &str) -> String {
        format!("{}:hash:{}", self.prefix, hash)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.prefix)
    }

    /// Resolves a raw key to its consumer, or `None` when the key is
    /// unknown, revoked, or expired. Store failures are errors, not `None`:
    /// authentication never silently degrades.
    pub async fn validate(&self, raw_key: &str) -> Result<Option<ApiConsumer>, ProxyError> {
        let raw_key = raw_key.trim();
        if raw_key.is_empty() {
            return Ok(None);
        }

        let hash = sha256_hex(raw_key);
        let Some(key_id) = self.store.get(&self.hash_index_key(&hash)).await? else {
            return Ok(None);
        };
        let Some(json) = self.store.get(&self.record_key(&key_id)).await? else {
            return Ok(None);
        };
        let record: ApiKeyRecord = match serde_json::from_str(&json) {
            Ok(record) => record,
            Err(e) => {
                warn!("Undecodable key record for id {key_id}: {e}");
                return Ok(None);
            }
        };

        if record.is_valid(Utc::now()) {
            Ok(Some(ApiConsumer {
                key_id: record.key_id,
                owner: record.owner,
            }))
        } else {
            Ok(None)
        }
    }

    /// Mints a new key. The raw value is returned to the caller exactly once
    /// and exists nowhere else; only its hash is stored.
    pub async fn create(
        &self,
        request: CreateKeyRequest,
    ) -> Result<(String, ApiKeyRecord), ProxyError> {
        let owner = request.owner.trim().to_string();
        if owner.is_empty() {
            return Err(ProxyError::InvalidRequest("owner must not be empty".to_string()));
        }

        let raw_key = generate_raw_key();
        let record = ApiKeyRecord {
            key_id: uuid::Uuid::new_v4().to_string(),
            hash: sha256_hex(&raw_key),
            owner,
            label: request.label,
            contact: request.contact,
            created_at: Utc::now(),
            created_by: request.created_by,
            revoked: false,
            revoked_at: None,
            expires_at: request.expires_at,
        };

        self.persist(&record).await?;
        self.store
            .sadd(&self.index_key(), &record.key_id)
            .await?;

        Ok((raw_key, record))
    }

    /// All records, newest first. Index members whose record has vanished
    /// are pruned on the way through.
    pub async fn list(&self) -> Result<Vec<ApiKeyRecord>, ProxyError> {
        let mut records = Vec::new();
        for key_id in self.store.smembers(&self.index_key()).await? {
            match self.store.get(&self.record_key(&key_id)).await? {
                Some(json) => match serde_json::from_str::<ApiKeyRecord>(&json) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping undecodable key record {key_id}: {e}"),
                },
                None => {
                    warn!("Pruning stale index entry for missing key {key_id}");
                    self.store.srem(&self.index_key(), &key_id).await?;
                }
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub async fn revoke(&self, key_id: &str) -> Result<ApiKeyRecord, ProxyError> {
        let mut record = self.load(key_id).await?;
        record.revoked = true;
        record.revoked_at = Some(Utc::now());
        self.persist(&record).await?;
        Ok(record)
    }

    pub async fn activate(&self, key_id: &str) -> Result<ApiKeyRecord, ProxyError> {
        let mut record = self.load(key_id).await?;
        record.revoked = false;
        record.revoked_at = None;
        self.persist(&record).await?;
        Ok(record)
    }

    /// Removes the record, its hash index entry, and its index membership.
    pub async fn delete(&self, key_id: &str) -> Result<(), ProxyError> {
        let record = self.load(key_id).await?;
        self.store
            .del(&[
                self.record_key(&record.key_id),
                self.hash_index_key(&record.hash),
            ])
            .await?;
        self.store.srem(&self.index_key(), &record.key_id).await?;
        Ok(())
    }

    async fn load(&self, key_id: &str) -> Result<ApiKeyRecord, ProxyError> {
        let Some(json) = self.store.get(&self.record_key(key_id)).await? else {
            return Err(ProxyError::NotFound(format!("No API key with id {key_id}")));
        };
        serde_json::from_str(&json)
            .map_err(|e| ProxyError::Internal(format!("Undecodable key record {key_id}: {e}")))
    }

    async fn persist(&self, record: &ApiKeyRecord) -> Result<(), ProxyError> {
        let json = serde_json::to_string(record)?;
        self.store
            .set(&self.record_key(&record.key_id), &json, None)
            .await?;
        self.store
            .set(&self.hash_index_key(&record.hash), &record.key_id, None)
            .await?;
        Ok(())
    }
}

fn generate_raw_key() -> String {
    let mut bytes = [0u8; RAW_KEY_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{RAW_KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}
