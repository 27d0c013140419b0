// src/core/store/mod.rs

//! The shared key/value state store underlying the response cache, the
//! API-key registry, and the rate limiter.
//!
//! Two real implementations exist: [`redis::RedisStore`] over a single
//! long-lived multiplexed connection, and [`memory::MemoryStore`] for tests.
//! When the remote store is unreachable at startup the process runs against
//! [`FallbackStore`] instead: every operation fails, `is_fallback()` reports
//! `true`, and the proxy degrades to pass-through traffic.

pub mod memory;
pub mod redis;

use crate::core::ProxyError;
use async_trait::async_trait;
use std::time::Duration;

/// String key/value operations shared by every store consumer. All TTLs are
/// expressed as [`Duration`]; each implementation translates to its backing
/// service's native unit.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// True when this store is the no-op stand-in for an unreachable backend.
    fn is_fallback(&self) -> bool {
        false
    }

    /// Liveness probe against the backing service.
    async fn ping(&self) -> Result<(), ProxyError>;

    async fn get(&self, key: &str) -> Result<Option<String>, ProxyError>;

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), ProxyError>;

    /// Deletes the given keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, ProxyError>;

    async fn exists(&self, key: &str) -> Result<bool, ProxyError>;

    /// Atomic increment; creates the counter at 1 when absent.
    async fn incr(&self, key: &str) -> Result<i64, ProxyError>;

    /// Applies a TTL to an existing key. Returns false when the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ProxyError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), ProxyError>;

    async fn srem(&self, key: &str, member: &str) -> Result<(), ProxyError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, ProxyError>;

    /// One step of a cursor-based pattern scan. Returns the next cursor (0
    /// when the iteration is complete) and a batch of matching keys. This is
    /// the only enumeration primitive the store exposes; there is no KEYS.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), ProxyError>;
}

/// No-op stand-in used when the remote store could not be reached at
/// startup. Consumers check `is_fallback()` before deciding whether to
/// fail closed (key validation, invalidation) or pass through (cache).
#[derive(Debug, Default)]
pub struct FallbackStore;

impl FallbackStore {
    fn offline<T>() -> Result<T, ProxyError> {
        Err(ProxyError::Unavailable("state store offline".to_string()))
    }
}

#[async_trait]
impl StateStore for FallbackStore {
    fn is_fallback(&self) -> bool {
        true
    }

    async fn ping(&self) -> Result<(), ProxyError> {
        Self::offline()
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, ProxyError> {
        Self::offline()
    }

    async fn set(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> Result<(), ProxyError> {
        Self::offline()
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, ProxyError> {
        Self::offline()
    }

    async fn exists(&self, _key: &str) -> Result<bool, ProxyError> {
        Self::offline()
    }

    async fn incr(&self, _key: &str) -> Result<i64, ProxyError> {
        Self::offline()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, ProxyError> {
        Self::offline()
    }

    async fn sadd(&self, _key: &str, _member: &str) -> Result<(), ProxyError> {
        Self::offline()
    }

    async fn srem(&self, _key: &str, _member: &str) -> Result<(), ProxyError> {
        Self::offline()
    }

    async fn smembers(&self, _key: &str) -> Result<Vec<String>, ProxyError> {
        Self::offline()
    }

    async fn scan(
        &self,
        _cursor: u64,
        _pattern: &str,
        _count: usize,
    ) -> Result<(u64, Vec<String>), ProxyError> {
        Self::offline()
    }
}
