// src/core/cache/policy.rs

//! Pure cache policy: key construction, cacheability decisions, and bypass
//! rules. Nothing here touches the network or the store, which keeps every
//! decision auditable in isolation.

use crate::core::hash::sha256_hex;
use crate::core::upstream::UpstreamResponse;
use std::collections::HashMap;

/// Namespace prefix for every cache key. The admin invalidator only ever
/// composes patterns inside this namespace.
pub const CACHE_KEY_PREFIX: &str = "proxy";

#[derive(Debug, Clone, Copy, Default)]
pub struct DecideOptions {
    /// When set, upstream `cache-control` is disregarded entirely and the
    /// caller's default TTL applies.
    pub ignore_upstream_control: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDecision {
    pub cacheable: bool,
    /// TTL derived from upstream directives; `None` means the caller's
    /// default applies.
    pub ttl_seconds: Option<u64>,
}

impl CacheDecision {
    fn no() -> Self {
        Self {
            cacheable: false,
            ttl_seconds: None,
        }
    }

    fn yes(ttl_seconds: Option<u64>) -> Self {
        Self {
            cacheable: true,
            ttl_seconds,
        }
    }
}

/// Builds the stable cache key for a request.
///
/// Layout: `proxy:{METHOD}:{PATH_WITH_QUERY}:{accept}|{accept-language}|{salt}`
/// where the salt is the hex SHA-256 of `METHOD:PATH:raw_key`. The raw key
/// material itself never appears in the key; two requests that differ only in
/// their API key still land on different entries, and header casing does not
/// split the cache.
pub fn build_key(
    method: &str,
    path_with_query: &str,
    accept: Option<&str>,
    accept_language: Option<&str>,
    api_key: Option<&str>,
) -> String {
    let fingerprint = header_fingerprint(method, path_with_query, accept, accept_language, api_key);
    format!("{CACHE_KEY_PREFIX}:{method}:{path_with_query}:{fingerprint}")
}

fn header_fingerprint(
    method: &str,
    path_with_query: &str,
    accept: Option<&str>,
    accept_language: Option<&str>,
    api_key: Option<&str>,
) -> String {
    let salt = credential_salt(method, path_with_query, api_key);
    format!(
        "{}|{}|{}",
        normalize_header(accept),
        normalize_header(accept_language),
        salt
    )
}

fn normalize_header(value: Option<&str>) -> String {
    value.map(|v| v.trim().to_lowercase()).unwrap_or_default()
}

/// Salts the fingerprint with the caller's credential, mixed with method and
/// path so one raw key never yields the same salt across endpoints.
fn credential_salt(method: &str, path_with_query: &str, api_key: Option<&str>) -> String {
    match api_key.map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            sha256_hex(&format!("{method}:{path_with_query}:{raw}"))
        }
        _ => String::new(),
    }
}

/// Decides whether an upstream response may be cached and for how long.
///
/// Rules, in order: 204/304 never; non-2xx never; ignore-upstream-control
/// short-circuits to cacheable with the default TTL; `no-store`/`private`
/// never; `s-maxage` then `max-age` (floored, must be positive); a response
/// with no TTL directive is cacheable under the default TTL.
pub fn decide(response: &UpstreamResponse, options: DecideOptions) -> CacheDecision {
    if response.status == 204 || response.status == 304 {
        return CacheDecision::no();
    }
    if response.status < 200 || response.status >= 300 {
        return CacheDecision::no();
    }
    if options.ignore_upstream_control {
        return CacheDecision::yes(None);
    }

    let directives = response
        .headers
        .get("cache-control")
        .map(|v| parse_cache_control(v))
        .unwrap_or_default();

    if directives.contains_key("no-store") || directives.contains_key("private") {
        return CacheDecision::no();
    }

    for name in ["s-maxage", "max-age"] {
        if let Some(raw) = directives.get(name) {
            let Ok(value) = raw.parse::<f64>() else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let ttl = value.floor() as i64;
            if ttl <= 0 {
                return CacheDecision::no();
            }
            return CacheDecision::yes(Some(ttl as u64));
        }
    }

    CacheDecision::yes(None)
}

/// Parses a `cache-control` header into a directive map. Bare tokens map to
/// `"true"`; values lose surrounding double quotes.
pub fn parse_cache_control(value: &str) -> HashMap<String, String> {
    let mut directives = HashMap::new();
    for part in value.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((name, raw)) => {
                let raw = raw.trim();
                let raw = raw
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(raw);
                directives.insert(name.trim().to_lowercase(), raw.to_string());
            }
            None => {
                directives.insert(part.to_lowercase(), "true".to_string());
            }
        }
    }
    directives
}

/// True when the request must not touch the shared cache: an `authorization`
/// header is present (per-user responses must never pollute the shared
/// namespace), or the path falls under a configured bypass prefix.
pub fn should_bypass(
    authorization: Option<&str>,
    path_with_query: &str,
    bypass_prefixes: &[String],
) -> bool {
    if authorization.is_some_and(|v| !v.trim().is_empty()) {
        return true;
    }
    let base = normalize_base_path(path_with_query);
    bypass_prefixes.iter().any(|prefix| {
        prefix == "/" || base == *prefix || base.starts_with(&format!("{prefix}/"))
    })
}

/// The path with query stripped, a leading slash enforced, and trailing
/// slashes collapsed.
pub fn normalize_base_path(path_with_query: &str) -> String {
    let path = path_with_query
        .split_once('?')
        .map(|(p, _)| p)
        .unwrap_or(path_with_query);
    let mut base = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while base.len() > 1 && base.ends_with('/') {
        base.pop();
    }
    base
}
