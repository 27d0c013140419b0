// src/core/upstream.rs

//! Outbound HTTP client for the configured upstream origin.
//!
//! The base URL must be origin-only; request paths are joined against it and
//! the resolved origin is re-checked so no client-supplied path can steer a
//! request to another host. GET requests retry on transient failures; bodies
//! are decoded as JSON with a raw-text fallback.

use crate::core::ProxyError;
use crate::core::metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Response headers copied out of the upstream response. Everything else is
/// dropped at this boundary.
pub const RESPONSE_HEADER_ALLOWLIST: [&str; 8] = [
    "cache-control",
    "etag",
    "last-modified",
    "expires",
    "vary",
    "content-encoding",
    "content-language",
    "content-disposition",
];

/// The decoded upstream response as it is relayed and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse {
    pub status: u16,
    /// Decoded JSON, a raw string when decoding was not possible, or null
    /// for an empty body.
    pub body: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

pub struct UpstreamClient {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
    retries: u32,
}

impl UpstreamClient {
    /// Builds a client against an origin-only base URL. A base carrying a
    /// path component is a configuration error, not something to silently
    /// join against.
    pub fn new(base_url: &str, timeout_ms: u64, retries: u32) -> Result<Self, ProxyError> {
        let base = Url::parse(base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ProxyError::Config(format!(
                "Upstream base URL must be http(s), got scheme '{}'",
                base.scheme()
            )));
        }
        if base.host_str().is_none() {
            return Err(ProxyError::Config(
                "Upstream base URL must carry a host".to_string(),
            ));
        }
        if !matches!(base.path(), "" | "/") {
            return Err(ProxyError::Config(format!(
                "Upstream base URL must be origin-only, got path '{}'",
                base.path()
            )));
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base,
            timeout: Duration::from_millis(timeout_ms),
            retries,
        })
    }

    /// Resolves a request path against the configured origin, rejecting
    /// absolute-URL smuggling attempts.
    fn resolve(&self, path_with_query: &str) -> Result<Url, ProxyError> {
        let lowered = path_with_query.to_ascii_lowercase();
        if lowered.starts_with("http://")
            || lowered.starts_with("https://")
            || path_with_query.starts_with("//")
        {
            return Err(ProxyError::InvalidRequest(
                "Absolute URLs are not allowed in the request path".to_string(),
            ));
        }
        let resolved = self.base.join(path_with_query)?;
        if resolved.origin() != self.base.origin() {
            return Err(ProxyError::InvalidRequest(
                "Request path escapes the configured upstream origin".to_string(),
            ));
        }
        Ok(resolved)
    }

    /// Performs the request and returns the decoded response, whatever its
    /// status. Transport failures (connect, timeout) are errors; HTTP error
    /// statuses are data.
    pub async fn request_raw(
        &self,
        method: &str,
        path_with_query: &str,
        body: Option<&serde_json::Value>,
        headers: &BTreeMap<String, String>,
    ) -> Result<UpstreamResponse, ProxyError> {
        let url = self.resolve(path_with_query)?;
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| ProxyError::InvalidRequest(format!("Invalid method '{method}'")))?;

        // Only idempotent GETs are retried, and only on transport errors or
        // 5xx responses. 4xx responses and decode failures are final.
        let attempts = if method == reqwest::Method::GET {
            self.retries + 1
        } else {
            1
        };

        let mut last_err: Option<ProxyError> = None;
        for attempt in 0..attempts {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .timeout(self.timeout);
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if let Some(body) = body {
                // `json()` also forces `content-type: application/json`.
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if (500..600).contains(&status) && attempt + 1 < attempts {
                        debug!(
                            "Upstream returned {} for {}, retrying ({}/{})",
                            status,
                            url.path(),
                            attempt + 1,
                            attempts - 1
                        );
                        continue;
                    }
                    return self.decode(response).await;
                }
                Err(e) => {
                    metrics::UPSTREAM_FAILURES_TOTAL.inc();
                    let err = ProxyError::from(e);
                    if attempt + 1 < attempts {
                        debug!(
                            "Upstream request to {} failed ({}), retrying ({}/{})",
                            url.path(),
                            err,
                            attempt + 1,
                            attempts - 1
                        );
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ProxyError::Internal("retry loop exhausted".to_string())))
    }

    /// Convenience GET for internal callers; errors on non-2xx.
    pub async fn get(&self, path_with_query: &str) -> Result<UpstreamResponse, ProxyError> {
        let response = self
            .request_raw("GET", path_with_query, None, &BTreeMap::new())
            .await?;
        Self::require_success(response)
    }

    /// Convenience POST for internal callers; errors on non-2xx.
    pub async fn post(
        &self,
        path_with_query: &str,
        body: &serde_json::Value,
    ) -> Result<UpstreamResponse, ProxyError> {
        let response = self
            .request_raw("POST", path_with_query, Some(body), &BTreeMap::new())
            .await?;
        Self::require_success(response)
    }

    fn require_success(response: UpstreamResponse) -> Result<UpstreamResponse, ProxyError> {
        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err(ProxyError::Upstream(format!(
                "Upstream responded with status {}",
                response.status
            )))
        }
    }

    /// Copies out the retained headers and decodes the body. JSON bodies
    /// that fail to parse fall back to raw text; they never fail the
    /// request.
    async fn decode(&self, response: reqwest::Response) -> Result<UpstreamResponse, ProxyError> {
        let status = response.status().as_u16();

        let mut headers = BTreeMap::new();
        for name in RESPONSE_HEADER_ALLOWLIST {
            if let Some(value) = response.headers().get(name).and_then(|v| v.to_str().ok()) {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let text = response.text().await?;
        let body = if text.is_empty() {
            serde_json::Value::Null
        } else if content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
        {
            match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Upstream sent malformed JSON ({}), relaying as text", e);
                    serde_json::Value::String(text)
                }
            }
        } else {
            serde_json::Value::String(text)
        };

        Ok(UpstreamResponse {
            status,
            body,
            content_type,
            headers,
        })
    }
}
