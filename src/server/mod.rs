// src/server/mod.rs

//! Server bootstrap: wires the state store, cache, registry, limiter, and
//! upstream client together, then runs the axum surface until shutdown.

use crate::config::Config;
use crate::core::cache::CacheStore;
use crate::core::invalidate::AdminInvalidator;
use crate::core::keys::KeyRegistry;
use crate::core::ratelimit::RateLimiter;
use crate::core::store::redis::RedisStore;
use crate::core::store::{FallbackStore, StateStore};
use crate::core::upstream::UpstreamClient;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub mod metrics_server;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Builds the shared application state from configuration. The state store
/// connection is attempted once here; an unreachable backend selects the
/// fallback store, which keeps proxy traffic flowing in pass-through mode
/// while key validation and admin surfaces fail closed.
pub async fn build_state(config: Config) -> Result<Arc<AppState>> {
    let store: Arc<dyn StateStore> = match RedisStore::connect(&config.cache.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("State store unreachable ({e}); running in pass-through fallback mode");
            Arc::new(FallbackStore)
        }
    };

    let upstream = Arc::new(UpstreamClient::new(
        &config.upstream.base_url,
        config.upstream.timeout_ms,
        config.upstream.retries,
    )?);
    let cache = Arc::new(CacheStore::new(
        store.clone(),
        config.cache.ttl_default,
        config.cache.stale_ttl,
    ));
    let registry = Arc::new(KeyRegistry::new(
        store.clone(),
        &config.api_keys.redis_prefix,
    ));
    let limiter = Arc::new(RateLimiter::new(
        store.clone(),
        &config.api_keys.redis_prefix,
        config.api_keys.rate_limit_window_seconds,
        config.api_keys.rate_limit_max_requests,
    ));
    let invalidator = Arc::new(AdminInvalidator::new(store.clone()));

    Ok(Arc::new(AppState {
        config: Arc::new(config),
        store,
        cache,
        registry,
        limiter,
        upstream,
        invalidator,
    }))
}

/// The main server startup function. Runs until ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    let port = config.port;
    let metrics = config.metrics.clone();
    let state = build_state(config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    if metrics.enabled {
        tokio::spawn(metrics_server::run_metrics_server(
            metrics.port,
            shutdown_tx.subscribe(),
        ));
    }

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received.");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let app = routes::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("citrine listening on http://{addr}");

    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_rx.recv().await.ok();
        info!("Proxy shutting down.");
    })
    .await?;

    Ok(())
}
