// src/core/keys/types.rs

//! Record types for the API-key registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored client key. The raw key never appears here: only its SHA-256
/// hash is persisted, and the raw value is handed to the operator exactly
/// once at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub hash: String,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// A record authenticates requests while it is not revoked and not past
    /// its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.is_none_or(|at| now < at)
    }

    /// The record as returned on the admin wire: everything except the
    /// stored hash.
    pub fn public_view(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("hash");
        }
        value
    }
}

/// What a request resolves to once its key validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConsumer {
    pub key_id: String,
    pub owner: String,
}

/// Operator input for key creation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyRequest {
    pub owner: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
