// src/core/ratelimit.rs

//! Fixed-window rate limiting backed by atomic INCR + EXPIRE counters.
//!
//! A window is identified by `(scope, identifier, window_start)`; the
//! counter's TTL slightly outlives the window so abandoned counters clean
//! themselves up. Pre-auth and admin identifiers deliberately carry only the
//! *presence* of a credential, never the credential itself.

use crate::core::ProxyError;
use crate::core::metrics;
use crate::core::store::StateStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fallback window applied when the configured value is unusable.
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
/// Fallback per-window cap applied when the configured value is unusable.
pub const DEFAULT_MAX_REQUESTS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    /// Post-auth, per key id.
    Key,
    /// Pre-auth, per client IP + credential presence.
    Preauth,
    /// Admin surface, per client IP + bearer presence.
    Admin,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateScope::Key => "key",
            RateScope::Preauth => "preauth",
            RateScope::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the window resets; at least 1.
    pub retry_after: u64,
    /// Epoch seconds at which the window resets.
    pub reset_at: u64,
}

pub struct RateLimiter {
    store: Arc<dyn StateStore>,
    prefix: String,
    window_seconds: u64,
    max_requests: u64,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn StateStore>,
        prefix: &str,
        window_seconds: u64,
        max_requests: u64,
    ) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            window_seconds: if window_seconds == 0 {
                DEFAULT_WINDOW_SECONDS
            } else {
                window_seconds
            },
            max_requests: if max_requests == 0 {
                DEFAULT_MAX_REQUESTS
            } else {
                max_requests
            },
        }
    }

    /// Counts one request against the window and reports the verdict.
    pub async fn consume(
        &self,
        scope: RateScope,
        identifier: &str,
    ) -> Result<RateDecision, ProxyError> {
        let now = now_s();
        let window_start = (now / self.window_seconds) * self.window_seconds;
        let counter_key = format!(
            "{}:ratelimit:{}:{}:{}",
            self.prefix,
            scope.as_str(),
            identifier,
            window_start
        );

        let count = self.store.incr(&counter_key).await?;
        if count == 1 {
            self.store
                .expire(&counter_key, Duration::from_secs(self.window_seconds + 1))
                .await?;
        }

        let count = count.max(0) as u64;
        let allowed = count <= self.max_requests;
        if !allowed {
            metrics::THROTTLE_REJECTIONS_TOTAL
                .with_label_values(&[scope.as_str()])
                .inc();
        }
        let reset_at = window_start + self.window_seconds;
        Ok(RateDecision {
            allowed,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(count),
            retry_after: reset_at.saturating_sub(now).max(1),
            reset_at,
        })
    }

    /// Best-effort decision for when the counter backend cannot be reached:
    /// the full window budget, so responses still carry their rate-limit
    /// headers.
    pub fn fallback_decision(&self) -> RateDecision {
        let now = now_s();
        let window_start = (now / self.window_seconds) * self.window_seconds;
        let reset_at = window_start + self.window_seconds;
        RateDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests,
            retry_after: reset_at.saturating_sub(now).max(1),
            reset_at,
        }
    }
}

fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
