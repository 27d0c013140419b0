// src/core/proxy.rs

//! Pure request-pipeline helpers: header hygiene, the forwarding allowlist,
//! and path safety. The handler in `server::routes::proxy` composes these
//! with authentication, throttling, and the cache.

use crate::core::ProxyError;
use axum::http::HeaderMap;
use std::collections::BTreeMap;

/// Transport-level headers a proxy must never forward.
pub const HOP_BY_HOP_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Request headers allowed through to the upstream. Additionally every
/// `x-`-prefixed header passes (correlation ids), except the client
/// credential below.
pub const FORWARD_ALLOWLIST: [&str; 7] = [
    "accept",
    "accept-encoding",
    "accept-language",
    "api_key",
    "authorization",
    "content-type",
    "user-agent",
];

/// The client credential header. Consumed by authentication, never
/// forwarded upstream.
pub const AUTH_HEADER: &str = "x-api-key";

/// Drops hop-by-hop headers (the fixed RFC list plus every token named in
/// the request's own `connection` header), proxy-introduced addressing
/// headers, and coalesces multi-value headers into one comma-joined string.
/// Names come out lowercased.
pub fn normalize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let connection_tokens: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let mut normalized = BTreeMap::new();
    for name in headers.keys() {
        let lower = name.as_str().to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if lower.starts_with("x-forwarded-") || lower == "x-real-ip" {
            continue;
        }
        if connection_tokens.contains(&lower) {
            continue;
        }
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        normalized.insert(lower, joined);
    }
    normalized
}

/// Applies the forwarding allowlist to normalized headers. `x-`-prefixed
/// headers pass for correlation, but the client credential never leaves the
/// proxy.
pub fn filter_forward_headers(normalized: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    normalized
        .iter()
        .filter(|(name, _)| {
            if name.as_str() == AUTH_HEADER {
                return false;
            }
            FORWARD_ALLOWLIST.contains(&name.as_str()) || name.starts_with("x-")
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Path safety for the stripped route remainder: absolute URLs are rejected,
/// duplicated leading slashes collapse, and an empty remainder becomes the
/// root.
pub fn sanitize_path(raw: &str) -> Result<String, ProxyError> {
    if raw.contains("://") {
        return Err(ProxyError::InvalidRequest(
            "Absolute URLs are not allowed in the request path".to_string(),
        ));
    }
    let mut path = raw.to_string();
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.starts_with("//") {
        path.remove(0);
    }
    if path.is_empty() {
        path.push('/');
    }
    Ok(path)
}
