// src/core/metrics.rs

//! Defines and registers Prometheus metrics for proxy monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, TextEncoder, register_counter, register_counter_vec,
};

lazy_static! {
    /// Proxied requests, labeled by method.
    pub static ref PROXY_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "citrine_proxy_requests_total",
        "Total number of proxied requests, labeled by method.",
        &["method"]
    )
    .unwrap();

    /// Cache lookups, labeled by their `x-cache` outcome.
    pub static ref CACHE_RESULTS_TOTAL: CounterVec = register_counter_vec!(
        "citrine_cache_results_total",
        "Total number of cache lookups, labeled by status (hit/miss/stale/bypass).",
        &["status"]
    )
    .unwrap();

    /// Background stale-while-revalidate refreshes scheduled.
    pub static ref CACHE_REFRESHES_TOTAL: Counter = register_counter!(
        "citrine_cache_refreshes_total",
        "Total number of background cache refreshes started."
    )
    .unwrap();

    /// Upstream transport failures (connect errors and timeouts).
    pub static ref UPSTREAM_FAILURES_TOTAL: Counter = register_counter!(
        "citrine_upstream_failures_total",
        "Total number of failed upstream requests."
    )
    .unwrap();

    /// Requests rejected by a rate-limit window, labeled by scope.
    pub static ref THROTTLE_REJECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "citrine_throttle_rejections_total",
        "Total number of rate-limited requests, labeled by scope.",
        &["scope"]
    )
    .unwrap();

    /// Admin cache invalidation runs.
    pub static ref ADMIN_INVALIDATIONS_TOTAL: Counter = register_counter!(
        "citrine_admin_invalidations_total",
        "Total number of admin cache invalidation requests executed."
    )
    .unwrap();
}

/// Gathers all registered metrics and encodes them into the Prometheus text
/// format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
