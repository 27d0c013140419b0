// src/core/invalidate.rs

//! Admin cache invalidation: translates an operator request into a
//! cursor-based SCAN plus batched DELs, or a single-key delete.
//!
//! Every composed pattern starts with the literal `proxy:GET:` namespace and
//! all operator-supplied segments are glob-escaped, so nothing outside the
//! response cache is enumerable or deletable through this path. There is no
//! KEYS anywhere: enumeration is always an incremental SCAN.

use crate::core::ProxyError;
use crate::core::cache::policy;
use crate::core::metrics;
use crate::core::store::StateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Keys requested from the store per SCAN step.
const SCAN_COUNT: usize = 200;
/// Maximum keys per DEL call.
const DELETE_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationScope {
    Exact,
    Prefix,
    All,
}

impl InvalidationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationScope::Exact => "exact",
            InvalidationScope::Prefix => "prefix",
            InvalidationScope::All => "all",
        }
    }
}

/// Header components for recomputing an exact cache key under `strict`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantHeaders {
    #[serde(default)]
    pub accept: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationRequest {
    pub scope: InvalidationScope,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub headers: Option<VariantHeaders>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationResult {
    pub scope: &'static str,
    pub dry_run: bool,
    pub matched: u64,
    pub deleted: u64,
}

pub struct AdminInvalidator {
    store: Arc<dyn StateStore>,
}

impl AdminInvalidator {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn invalidate(
        &self,
        request: &InvalidationRequest,
    ) -> Result<InvalidationResult, ProxyError> {
        if self.store.is_fallback() {
            return Err(ProxyError::Unavailable("state store offline".to_string()));
        }
        metrics::ADMIN_INVALIDATIONS_TOTAL.inc();

        match request.scope {
            InvalidationScope::All => {
                self.invalidate_pattern(request, "proxy:GET:*".to_string())
                    .await
            }
            InvalidationScope::Prefix => {
                let prefix = request
                    .path_prefix
                    .as_deref()
                    .ok_or_else(|| {
                        ProxyError::InvalidRequest(
                            "pathPrefix is required for scope=prefix".to_string(),
                        )
                    })?;
                if prefix.contains('?') {
                    return Err(ProxyError::InvalidRequest(
                        "pathPrefix must not contain a query string".to_string(),
                    ));
                }
                let normalized = normalize_prefix(prefix);
                let pattern = format!("proxy:GET:{}*", escape_glob(&normalized));
                self.invalidate_pattern(request, pattern).await
            }
            InvalidationScope::Exact => {
                let path = request.path.as_deref().ok_or_else(|| {
                    ProxyError::InvalidRequest("path is required for scope=exact".to_string())
                })?;
                let normalized = normalize_path(path);
                if request.strict {
                    let headers = request.headers.clone().unwrap_or_default();
                    let key = policy::build_key(
                        "GET",
                        &normalized,
                        headers.accept.as_deref(),
                        headers.accept_language.as_deref(),
                        headers.api_key.as_deref(),
                    );
                    self.invalidate_exact(request, &key).await
                } else {
                    // Match every header-variant key for this path + query.
                    let pattern = format!("proxy:GET:{}:*", escape_glob(&normalized));
                    self.invalidate_pattern(request, pattern).await
                }
            }
        }
    }

    /// SCANs the pattern to completion, deleting matches in bounded batches.
    async fn invalidate_pattern(
        &self,
        request: &InvalidationRequest,
        pattern: String,
    ) -> Result<InvalidationResult, ProxyError> {
        let mut matched: Vec<String> = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, keys) = self.store.scan(cursor, &pattern, SCAN_COUNT).await?;
            matched.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let mut deleted = 0u64;
        if !request.dry_run {
            for batch in matched.chunks(DELETE_BATCH) {
                deleted += self.store.del(batch).await?;
            }
        }

        debug!(
            "Invalidation scope={} matched={} deleted={} dry_run={}",
            request.scope.as_str(),
            matched.len(),
            deleted,
            request.dry_run
        );
        Ok(InvalidationResult {
            scope: request.scope.as_str(),
            dry_run: request.dry_run,
            matched: matched.len() as u64,
            deleted,
        })
    }

    /// Strict single-key path: EXISTS, then an optional DEL.
    async fn invalidate_exact(
        &self,
        request: &InvalidationRequest,
        key: &str,
    ) -> Result<InvalidationResult, ProxyError> {
        let matched = if self.store.exists(key).await? { 1 } else { 0 };
        let deleted = if request.dry_run || matched == 0 {
            0
        } else {
            self.store.del(&[key.to_string()]).await?
        };
        Ok(InvalidationResult {
            scope: request.scope.as_str(),
            dry_run: request.dry_run,
            matched,
            deleted,
        })
    }
}

/// Escapes the Redis glob metacharacters `\ * ? [ ]` in a literal segment.
pub fn escape_glob(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        if matches!(c, '\\' | '*' | '?' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Prefix normalization: leading slash forced, inner duplicate slashes
/// collapsed, trailing slash stripped.
fn normalize_prefix(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    out.push('/');
    let mut last_was_slash = true;
    for c in prefix.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push('/');
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Exact-path normalization: the path part gets a leading slash and
/// collapsed duplicate slashes; the query, when present, is preserved
/// verbatim.
fn normalize_path(path: &str) -> String {
    match path.split_once('?') {
        Some((p, q)) => format!("{}?{}", normalize_prefix(p), q),
        None => normalize_prefix(path),
    }
}
