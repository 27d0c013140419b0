// src/server/state.rs

//! Shared per-process state handed to every request handler.

use crate::config::Config;
use crate::core::cache::CacheStore;
use crate::core::invalidate::AdminInvalidator;
use crate::core::keys::KeyRegistry;
use crate::core::ratelimit::RateLimiter;
use crate::core::store::StateStore;
use crate::core::upstream::UpstreamClient;
use std::sync::Arc;

/// Immutable configuration plus the long-lived client handles. Everything
/// here is safe to share across request handlers; there is no other shared
/// mutable state in the process.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn StateStore>,
    pub cache: Arc<CacheStore>,
    pub registry: Arc<KeyRegistry>,
    pub limiter: Arc<RateLimiter>,
    pub upstream: Arc<UpstreamClient>,
    pub invalidator: Arc<AdminInvalidator>,
}
