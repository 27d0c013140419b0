// src/server/routes/health.rs

//! Liveness and cache-backend health probes.

use crate::server::AppState;
use axum::Json;
use axum::extract::State;
use serde_json::json;
use std::sync::Arc;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Reports `degraded` when the process runs on the fallback store or the
/// backend stops answering PING.
pub async fn health_cache(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    if state.store.is_fallback() {
        return Json(json!({
            "status": "degraded",
            "message": "state store unreachable at startup; proxying in pass-through mode",
        }));
    }
    match state.store.ping().await {
        Ok(()) => Json(json!({ "status": "ok" })),
        Err(e) => Json(json!({
            "status": "degraded",
            "message": format!("state store ping failed: {e}"),
        })),
    }
}
