// src/server/routes/admin.rs

//! The guarded `/internal` admin surface: API-key lifecycle and cache
//! invalidation. Every request passes the bearer guard (constant-time token
//! comparison plus an admin-scope rate limit) and every action emits one
//! audit record.

use crate::core::ProxyError;
use crate::core::audit::{AuditEvent, AuditResult};
use crate::core::hash::{constant_time_eq, fingerprint};
use crate::core::invalidate::InvalidationRequest;
use crate::core::keys::CreateKeyRequest;
use crate::core::ratelimit::RateScope;
use crate::server::AppState;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, post};
use axum::{Extension, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/api-keys", post(create_key).get(list_keys))
        .route("/api-keys/{key_id}/revoke", post(revoke_key))
        .route("/api-keys/{key_id}/activate", post(activate_key))
        .route("/api-keys/{key_id}", delete(delete_key))
        .route("/cache/invalidate", post(invalidate_cache))
        .route_layer(middleware::from_fn_with_state(state, admin_guard))
}

/// Per-request admin context threaded from the guard into the handlers.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub identity: String,
    pub ip: String,
    pub request_id: Option<String>,
}

/// Bearer authentication for the admin surface. The presented token is
/// compared against the configured one in constant time; the logged
/// identity is a hash fingerprint, never the token itself.
async fn admin_guard(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = addr.ip().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bearer = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    // Admin throttling keys off IP and bearer presence only.
    let presence = if bearer.is_some() { "present" } else { "missing" };
    let identifier = format!("{ip}:{presence}");
    match state.limiter.consume(RateScope::Admin, &identifier).await {
        Ok(rate) if !rate.allowed => {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", rate.retry_after.to_string())],
                Json(json!({ "message": "Rate limit exceeded" })),
            )
                .into_response();
        }
        Ok(_) => {}
        Err(e) => {
            // Admin operations fail closed when the backend is away. The
            // detail stays in the logs; the caller is not authenticated yet.
            error!("Admin rate limiter unavailable: {e}");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "message": "State store unavailable" })),
            )
                .into_response();
        }
    }

    let authorized = match (&state.config.admin.token, &bearer) {
        (Some(expected), Some(presented)) => {
            constant_time_eq(expected.as_bytes(), presented.as_bytes())
        }
        _ => false,
    };

    if !authorized {
        AuditEvent::new("admin", "auth", AuditResult::Error, "anonymous", &ip)
            .request_id(request_id.as_deref())
            .detail("reason", json!("invalid or missing bearer token"))
            .emit();
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        )
            .into_response();
    }

    let identity = format!(
        "token:{}",
        fingerprint(state.config.admin.token.as_deref().unwrap_or_default())
    );
    request.extensions_mut().insert(AdminContext {
        identity,
        ip,
        request_id,
    });
    next.run(request).await
}

fn admin_error(error: &ProxyError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "message": error.public_message() }))).into_response()
}

fn audit(ctx: &AdminContext, action: &'static str, result: AuditResult) -> AuditEvent {
    AuditEvent::new("admin", action, result, &ctx.identity, &ctx.ip)
        .request_id(ctx.request_id.as_deref())
}

async fn create_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AdminContext>,
    Json(request): Json<CreateKeyRequest>,
) -> Response {
    match state.registry.create(request).await {
        Ok((raw_key, record)) => {
            audit(&ctx, "api_keys.create", AuditResult::Ok)
                .detail("keyId", json!(record.key_id))
                .detail("owner", json!(record.owner))
                .emit();
            // The only place the raw key ever leaves the process.
            let mut body = record.public_view();
            if let Some(map) = body.as_object_mut() {
                map.insert("apiKey".to_string(), json!(raw_key));
            }
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(e) => {
            audit(&ctx, "api_keys.create", AuditResult::Error)
                .detail("error", json!(e.public_message()))
                .emit();
            admin_error(&e)
        }
    }
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AdminContext>,
) -> Response {
    match state.registry.list().await {
        Ok(records) => {
            audit(&ctx, "api_keys.list", AuditResult::Ok)
                .detail("count", json!(records.len()))
                .emit();
            let items: Vec<serde_json::Value> =
                records.iter().map(|r| r.public_view()).collect();
            Json(json!({ "items": items })).into_response()
        }
        Err(e) => {
            audit(&ctx, "api_keys.list", AuditResult::Error)
                .detail("error", json!(e.public_message()))
                .emit();
            admin_error(&e)
        }
    }
}

async fn revoke_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AdminContext>,
    Path(key_id): Path<String>,
) -> Response {
    match state.registry.revoke(&key_id).await {
        Ok(_) => {
            audit(&ctx, "api_keys.revoke", AuditResult::Ok)
                .detail("keyId", json!(key_id))
                .emit();
            Json(json!({ "ok": true })).into_response()
        }
        Err(e) => {
            audit(&ctx, "api_keys.revoke", AuditResult::Error)
                .detail("keyId", json!(key_id))
                .detail("error", json!(e.public_message()))
                .emit();
            admin_error(&e)
        }
    }
}

async fn activate_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AdminContext>,
    Path(key_id): Path<String>,
) -> Response {
    match state.registry.activate(&key_id).await {
        Ok(_) => {
            audit(&ctx, "api_keys.activate", AuditResult::Ok)
                .detail("keyId", json!(key_id))
                .emit();
            Json(json!({ "ok": true })).into_response()
        }
        Err(e) => {
            audit(&ctx, "api_keys.activate", AuditResult::Error)
                .detail("keyId", json!(key_id))
                .detail("error", json!(e.public_message()))
                .emit();
            admin_error(&e)
        }
    }
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AdminContext>,
    Path(key_id): Path<String>,
) -> Response {
    match state.registry.delete(&key_id).await {
        Ok(()) => {
            audit(&ctx, "api_keys.delete", AuditResult::Ok)
                .detail("keyId", json!(key_id))
                .emit();
            Json(json!({ "ok": true })).into_response()
        }
        Err(e) => {
            audit(&ctx, "api_keys.delete", AuditResult::Error)
                .detail("keyId", json!(key_id))
                .detail("error", json!(e.public_message()))
                .emit();
            admin_error(&e)
        }
    }
}

async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AdminContext>,
    Json(request): Json<InvalidationRequest>,
) -> Response {
    match state.invalidator.invalidate(&request).await {
        Ok(result) => {
            audit(&ctx, "cache.invalidate", AuditResult::Ok)
                .detail("scope", json!(result.scope))
                .detail("matched", json!(result.matched))
                .detail("deleted", json!(result.deleted))
                .detail("dryRun", json!(result.dry_run))
                .emit();
            Json(json!({
                "ok": true,
                "scope": result.scope,
                "dryRun": result.dry_run,
                "matched": result.matched,
                "deleted": result.deleted,
            }))
            .into_response()
        }
        Err(e) => {
            audit(&ctx, "cache.invalidate", AuditResult::Error)
                .detail("scope", json!(request.scope.as_str()))
                .detail("error", json!(e.public_message()))
                .emit();
            admin_error(&e)
        }
    }
}
