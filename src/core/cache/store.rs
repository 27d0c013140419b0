// src/core/cache/store.rs

//! Envelope-aware cache store with cache-aside + stale-while-revalidate.
//!
//! Entries are stored as a tagged envelope `{value, staleUntil, marker}` so
//! a reader can tell "fresh" from "stale but servable". Values written by
//! older deployments lack the marker and are treated as fresh. Background
//! refreshes are spawned tasks whose lifetime is decoupled from the request
//! that triggered them; their failures are logged and swallowed.

use crate::core::ProxyError;
use crate::core::hash::fingerprint;
use crate::core::metrics;
use crate::core::store::StateStore;
use crate::core::upstream::UpstreamResponse;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of a cache-aside lookup, surfaced to the client as `x-cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// What a loader produced: the upstream value plus the resolved policy
/// decision. `ttl`/`stale_ttl` of `None` fall back to the store defaults.
#[derive(Debug, Clone)]
pub struct LoaderOutcome {
    pub value: UpstreamResponse,
    pub cacheable: bool,
    pub ttl: Option<u64>,
    pub stale_ttl: Option<u64>,
}

/// A loader is invoked on MISS (foreground) and on STALE (background), so it
/// must be callable more than once.
pub type Loader =
    Arc<dyn Fn() -> BoxFuture<'static, Result<LoaderOutcome, ProxyError>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SwrOutcome {
    pub value: UpstreamResponse,
    pub status: CacheStatus,
}

/// The stored representation. `stale_until` is epoch milliseconds; the
/// backing TTL covers the fresh window plus the stale window.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEnvelope {
    value: UpstreamResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    stale_until: Option<i64>,
    marker: bool,
}

#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn StateStore>,
    /// Per-key locks so a burst of STALE reads schedules one refresh, not
    /// one per request. Best-effort: losing the race just skips a refresh.
    swr_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    default_ttl: u64,
    default_stale_ttl: u64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl CacheStore {
    pub fn new(store: Arc<dyn StateStore>, default_ttl: u64, default_stale_ttl: u64) -> Self {
        Self {
            store,
            swr_locks: Arc::new(DashMap::new()),
            default_ttl,
            default_stale_ttl,
        }
    }

    /// Reads the cached value regardless of staleness. Backing errors are
    /// logged and surface as an absent entry.
    pub async fn get(&self, key: &str) -> Option<UpstreamResponse> {
        self.read_entry(key).await.map(|(value, _)| value)
    }

    /// Stores a value. With a stale window the entry becomes an envelope
    /// whose backing TTL spans both windows; without one the bare value is
    /// written under the fresh TTL alone.
    pub async fn set(
        &self,
        key: &str,
        value: &UpstreamResponse,
        ttl: u64,
        stale_ttl: u64,
    ) -> Result<(), ProxyError> {
        let (payload, backing_ttl) = if stale_ttl > 0 {
            let envelope = CacheEnvelope {
                value: value.clone(),
                stale_until: Some(now_ms() + (ttl as i64) * 1000),
                marker: true,
            };
            (serde_json::to_string(&envelope)?, ttl + stale_ttl)
        } else {
            (serde_json::to_string(value)?, ttl)
        };
        self.store
            .set(key, &payload, Some(Duration::from_secs(backing_ttl)))
            .await
    }

    /// Deletes an entry. Errors are logged, never propagated.
    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.del(&[key.to_string()]).await {
            warn!("Cache delete failed for {}: {}", fingerprint(key), e);
        }
    }

    /// Cache-aside with stale-while-revalidate.
    ///
    /// - fallback store: the loader runs once, nothing is written (BYPASS);
    /// - fresh entry: served as-is (HIT);
    /// - stale entry: served as-is and a background refresh is scheduled
    ///   (STALE);
    /// - absent: the loader runs; non-cacheable outcomes and failed writes
    ///   both surface as BYPASS, successful writes as MISS.
    pub async fn swr(&self, key: &str, loader: Loader) -> Result<SwrOutcome, ProxyError> {
        if self.store.is_fallback() {
            let outcome = loader().await?;
            return Ok(SwrOutcome {
                value: outcome.value,
                status: CacheStatus::Bypass,
            });
        }

        if let Some((value, stale_until)) = self.read_entry(key).await {
            match stale_until {
                Some(deadline) if now_ms() > deadline => {
                    debug!("Cache stale for {}, scheduling refresh", fingerprint(key));
                    self.schedule_refresh(key, loader);
                    return Ok(SwrOutcome {
                        value,
                        status: CacheStatus::Stale,
                    });
                }
                _ => {
                    debug!("Cache hit for {}", fingerprint(key));
                    return Ok(SwrOutcome {
                        value,
                        status: CacheStatus::Hit,
                    });
                }
            }
        }

        let outcome = loader().await?;
        if !outcome.cacheable {
            debug!("Loader declined caching for {}", fingerprint(key));
            return Ok(SwrOutcome {
                value: outcome.value,
                status: CacheStatus::Bypass,
            });
        }

        let ttl = outcome.ttl.unwrap_or(self.default_ttl);
        let stale_ttl = outcome.stale_ttl.unwrap_or(self.default_stale_ttl);
        let status = match self.set(key, &outcome.value, ttl, stale_ttl).await {
            Ok(()) => {
                debug!(
                    "Cache miss for {}, stored with ttl={}s stale={}s",
                    fingerprint(key),
                    ttl,
                    stale_ttl
                );
                CacheStatus::Miss
            }
            Err(e) => {
                warn!("Cache write failed for {}: {}", fingerprint(key), e);
                CacheStatus::Bypass
            }
        };
        Ok(SwrOutcome {
            value: outcome.value,
            status,
        })
    }

    /// Loads and decodes an entry, tolerating both the tagged envelope and
    /// the legacy bare value (treated as fresh).
    async fn read_entry(&self, key: &str) -> Option<(UpstreamResponse, Option<i64>)> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed for {}: {}", fingerprint(key), e);
                return None;
            }
        };

        let parsed: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Discarding undecodable cache entry {}: {}", fingerprint(key), e);
                return None;
            }
        };

        if parsed.get("marker").and_then(|m| m.as_bool()) == Some(true) {
            match serde_json::from_value::<CacheEnvelope>(parsed) {
                Ok(envelope) => Some((envelope.value, envelope.stale_until)),
                Err(e) => {
                    warn!("Discarding malformed cache envelope {}: {}", fingerprint(key), e);
                    None
                }
            }
        } else {
            match serde_json::from_value::<UpstreamResponse>(parsed) {
                Ok(value) => Some((value, None)),
                Err(e) => {
                    warn!("Discarding malformed cache value {}: {}", fingerprint(key), e);
                    None
                }
            }
        }
    }

    /// Spawns a refresh task that outlives the triggering request. The
    /// per-key lock makes concurrent triggers collapse into one refresh;
    /// the last successful write wins either way.
    fn schedule_refresh(&self, key: &str, loader: Loader) {
        let lock = self
            .swr_locks
            .entry(key.to_string())
            .or_default()
            .clone();
        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let Ok(_guard) = lock.try_lock() else {
                debug!(
                    "Refresh already in flight for {}, skipping",
                    fingerprint(&key)
                );
                return;
            };
            metrics::CACHE_REFRESHES_TOTAL.inc();
            match loader().await {
                Ok(outcome) if outcome.cacheable => {
                    let ttl = outcome.ttl.unwrap_or(this.default_ttl);
                    let stale_ttl = outcome.stale_ttl.unwrap_or(this.default_stale_ttl);
                    if let Err(e) = this.set(&key, &outcome.value, ttl, stale_ttl).await {
                        warn!(
                            "Background refresh write failed for {}: {}",
                            fingerprint(&key),
                            e
                        );
                    }
                }
                Ok(_) => {
                    // The origin no longer allows caching this entry.
                    this.delete(&key).await;
                }
                Err(e) => {
                    warn!("Background refresh failed for {}: {}", fingerprint(&key), e);
                }
            }
            drop(_guard);
            this.swr_locks.remove(&key);
        });
    }
}
