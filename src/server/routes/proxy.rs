// src/server/routes/proxy.rs

//! The proxied `/api/v1` namespace: authentication, throttling, header
//! hygiene, path safety, cache-aside dispatch, and response relay.

use crate::core::ProxyError;
use crate::core::cache::policy::{self, DecideOptions};
use crate::core::cache::{CacheStatus, Loader, LoaderOutcome, SwrOutcome};
use crate::core::hash::fingerprint;
use crate::core::metrics;
use crate::core::proxy;
use crate::core::ratelimit::{RateDecision, RateScope};
use crate::core::upstream::UpstreamResponse;
use crate::server::AppState;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::response::Builder;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

/// External route prefix stripped before the path is resolved upstream.
const ROUTE_PREFIX: &str = "/api/v1";

pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    metrics::PROXY_REQUESTS_TOTAL
        .with_label_values(&[method.as_str()])
        .inc();
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let normalized = proxy::normalize_headers(&headers);

    // --- Authentication -------------------------------------------------
    let raw_key = normalized.get(proxy::AUTH_HEADER).cloned();
    let consumer = match &raw_key {
        Some(raw) => match state.registry.validate(raw).await {
            Ok(consumer) => consumer,
            Err(e) => {
                error!("Key validation unavailable: {e}");
                return error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Authentication backend unavailable",
                    Some(&state.limiter.fallback_decision()),
                    &request_id,
                );
            }
        },
        None => None,
    };

    let Some(consumer) = consumer else {
        // Unauthenticated callers burn a pre-auth window keyed by IP and
        // credential presence, never by the credential itself.
        let presence = if raw_key.is_some() { "present" } else { "missing" };
        let identifier = format!("{}:{}", addr.ip(), presence);
        return match state.limiter.consume(RateScope::Preauth, &identifier).await {
            Ok(rate) if !rate.allowed => rate_limited_response(&rate, &request_id),
            Ok(rate) => error_response(
                StatusCode::UNAUTHORIZED,
                "Invalid or missing API key",
                Some(&rate),
                &request_id,
            ),
            Err(e) => {
                // Rate-limit headers are part of the wire contract even when
                // the counter backend is away; a full-budget decision stands
                // in for the real one.
                error!("Pre-auth rate limiter unavailable: {e}");
                error_response(
                    StatusCode::UNAUTHORIZED,
                    "Invalid or missing API key",
                    Some(&state.limiter.fallback_decision()),
                    &request_id,
                )
            }
        };
    };

    // --- Throttling -----------------------------------------------------
    let rate = match state.limiter.consume(RateScope::Key, &consumer.key_id).await {
        Ok(rate) => {
            if !rate.allowed {
                return rate_limited_response(&rate, &request_id);
            }
            Some(rate)
        }
        Err(e) => {
            // A flaky counter backend must not take authenticated traffic
            // down with it, and the rate-limit headers stay on the wire.
            error!("Rate limiter unavailable: {e}");
            Some(state.limiter.fallback_decision())
        }
    };

    // --- Path safety ----------------------------------------------------
    let rest = uri.path().strip_prefix(ROUTE_PREFIX).unwrap_or("");
    let path = match proxy::sanitize_path(rest) {
        Ok(path) => path,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &e.public_message(),
                rate.as_ref(),
                &request_id,
            );
        }
    };
    let path_with_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    // --- Forwarded headers ----------------------------------------------
    let mut forward = proxy::filter_forward_headers(&normalized);
    if !forward.contains_key("api_key") && !state.config.upstream.api_key.is_empty() {
        forward.insert(
            "api_key".to_string(),
            state.config.upstream.api_key.clone(),
        );
    }

    // --- Method restriction ---------------------------------------------
    if method != Method::GET && method != Method::POST {
        return error_response(
            StatusCode::NOT_FOUND,
            "Not found",
            rate.as_ref(),
            &request_id,
        );
    }

    // --- POST: non-cached relay -----------------------------------------
    if method == Method::POST {
        let body_json = if body.is_empty() {
            None
        } else {
            let content_type = normalized
                .get("content-type")
                .map(String::as_str)
                .unwrap_or("");
            if !content_type.contains("application/json") && !content_type.contains("+json") {
                return error_response(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    "POST bodies must be JSON",
                    rate.as_ref(),
                    &request_id,
                );
            }
            match serde_json::from_slice::<serde_json::Value>(&body) {
                Ok(value) => Some(value),
                Err(_) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "Invalid JSON body",
                        rate.as_ref(),
                        &request_id,
                    );
                }
            }
        };

        return match state
            .upstream
            .request_raw("POST", &path_with_query, body_json.as_ref(), &forward)
            .await
        {
            Ok(value) => relay_response(&value, None, rate.as_ref(), &request_id, None),
            Err(e) => proxy_error_response(e, rate.as_ref(), &request_id),
        };
    }

    // --- GET: cache-aside dispatch --------------------------------------
    let cache_key = policy::build_key(
        "GET",
        &path_with_query,
        normalized.get("accept").map(String::as_str),
        normalized.get("accept-language").map(String::as_str),
        forward.get("api_key").map(String::as_str),
    );
    let key_hash = state
        .config
        .cache
        .debug
        .then(|| fingerprint(&cache_key));

    let bypass = policy::should_bypass(
        normalized.get("authorization").map(String::as_str),
        &path_with_query,
        &state.config.cache.bypass_paths,
    );

    let outcome = if bypass {
        match state
            .upstream
            .request_raw("GET", &path_with_query, None, &forward)
            .await
        {
            Ok(value) => SwrOutcome {
                value,
                status: CacheStatus::Bypass,
            },
            Err(e) => return proxy_error_response(e, rate.as_ref(), &request_id),
        }
    } else {
        let upstream = state.upstream.clone();
        let loader_path = path_with_query.clone();
        let loader_headers = forward.clone();
        let options = DecideOptions {
            ignore_upstream_control: state.config.cache.ignore_upstream_control,
        };
        let loader: Loader = Arc::new(move || {
            let upstream = upstream.clone();
            let path = loader_path.clone();
            let headers = loader_headers.clone();
            Box::pin(async move {
                let value = upstream.request_raw("GET", &path, None, &headers).await?;
                let decision = policy::decide(&value, options);
                Ok(LoaderOutcome {
                    value,
                    cacheable: decision.cacheable,
                    ttl: decision.ttl_seconds,
                    stale_ttl: None,
                })
            })
        });
        match state.cache.swr(&cache_key, loader).await {
            Ok(outcome) => outcome,
            Err(e) => return proxy_error_response(e, rate.as_ref(), &request_id),
        }
    };

    metrics::CACHE_RESULTS_TOTAL
        .with_label_values(&[outcome.status.as_str()])
        .inc();
    relay_response(
        &outcome.value,
        Some(outcome.status),
        rate.as_ref(),
        &request_id,
        key_hash.as_deref(),
    )
}

fn apply_rate_headers(mut builder: Builder, rate: &RateDecision) -> Builder {
    builder = builder
        .header("x-ratelimit-limit", rate.limit)
        .header("x-ratelimit-remaining", rate.remaining)
        .header("x-ratelimit-reset", rate.reset_at);
    builder
}

fn rate_limited_response(rate: &RateDecision, request_id: &str) -> Response {
    let builder = Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("content-type", "application/json")
        .header("retry-after", rate.retry_after)
        .header("x-request-id", request_id);
    let builder = apply_rate_headers(builder, rate);
    builder
        .body(Body::from(
            json!({ "message": "Rate limit exceeded" }).to_string(),
        ))
        .unwrap_or_else(|_| fallback_response())
}

fn error_response(
    status: StatusCode,
    message: &str,
    rate: Option<&RateDecision>,
    request_id: &str,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("x-request-id", request_id);
    if let Some(rate) = rate {
        builder = apply_rate_headers(builder, rate);
    }
    builder
        .body(Body::from(json!({ "message": message }).to_string()))
        .unwrap_or_else(|_| fallback_response())
}

/// Maps a pipeline error onto the wire: explicit 4xx failures pass through
/// with their message, everything else collapses into a generic 502. The
/// internal detail is logged here, once.
fn proxy_error_response(
    error: ProxyError,
    rate: Option<&RateDecision>,
    request_id: &str,
) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    if status.is_server_error() {
        error!("Proxy request failed: {error}");
    }
    error_response(status, &error.public_message(), rate, request_id)
}

/// Relays an upstream response: status, retained headers, content type
/// (unless the status forbids a body), cache trace headers, and the body.
fn relay_response(
    value: &UpstreamResponse,
    cache_status: Option<CacheStatus>,
    rate: Option<&RateDecision>,
    request_id: &str,
    key_hash: Option<&str>,
) -> Response {
    let omit_body = value.status == 204 || value.status == 304;

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(value.status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, header_value) in &value.headers {
        builder = builder.header(name.as_str(), header_value.as_str());
    }
    if !omit_body {
        if let Some(content_type) = &value.content_type {
            builder = builder.header("content-type", content_type.as_str());
        }
    }
    if let Some(status) = cache_status {
        builder = builder.header("x-cache", status.as_str());
    }
    if let Some(rate) = rate {
        builder = apply_rate_headers(builder, rate);
    }
    if let Some(hash) = key_hash {
        builder = builder.header("x-cache-key-hash", hash);
    }
    builder = builder.header("x-request-id", request_id);

    let body = if omit_body {
        Body::empty()
    } else {
        match &value.body {
            serde_json::Value::Null => Body::empty(),
            serde_json::Value::String(text) => Body::from(text.clone()),
            other => Body::from(serde_json::to_string(other).unwrap_or_default()),
        }
    };

    builder.body(body).unwrap_or_else(|_| fallback_response())
}

fn fallback_response() -> Response {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Body::from(
            json!({ "message": "Upstream request failed" }).to_string(),
        ))
        .expect("static fallback response")
}
