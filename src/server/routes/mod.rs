// src/server/routes/mod.rs

//! HTTP surface: health probes, the proxied `/api/v1` namespace, and the
//! guarded `/internal` admin endpoints.

pub mod admin;
pub mod health;
pub mod proxy;

use crate::server::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.proxy.body_limit;
    Router::new()
        .route("/health", get(health::health))
        .route("/health/cache", get(health::health_cache))
        .route("/api/v1", any(proxy::handle))
        .route("/api/v1/", any(proxy::handle))
        .route("/api/v1/{*path}", any(proxy::handle))
        .nest("/internal", admin::router(state.clone()))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
