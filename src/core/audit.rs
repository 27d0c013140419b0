// src/core/audit.rs

//! Structured audit records for admin actions.
//!
//! One JSON record per action, emitted through `tracing` under the `audit`
//! target: warn level on failure, info on success. No secret material ever
//! enters a record — admin identity is a token fingerprint, keys appear as
//! ids, cache keys as hashes.

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Ok,
    Error,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event: &'static str,
    pub action: &'static str,
    pub result: AuditResult,
    pub admin_identity: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Action-specific fields (scope, keyId, counts, ...).
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        event: &'static str,
        action: &'static str,
        result: AuditResult,
        admin_identity: &str,
        ip: &str,
    ) -> Self {
        Self {
            event,
            action,
            result,
            admin_identity: admin_identity.to_string(),
            ip: ip.to_string(),
            request_id: None,
            details: serde_json::Map::new(),
        }
    }

    pub fn request_id(mut self, request_id: Option<&str>) -> Self {
        self.request_id = request_id.map(str::to_string);
        self
    }

    pub fn detail(mut self, name: &str, value: serde_json::Value) -> Self {
        self.details.insert(name.to_string(), value);
        self
    }

    /// Serializes and emits the record.
    pub fn emit(self) {
        let json = serde_json::to_string(&self).unwrap_or_else(|_| "{}".to_string());
        match self.result {
            AuditResult::Ok => info!(target: "audit", "{json}"),
            AuditResult::Error => warn!(target: "audit", "{json}"),
        }
    }
}
