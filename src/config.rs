// src/config.rs

//! Manages proxy configuration: loading from the environment, resolving
//! defaults, and validation.

use crate::core::ratelimit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECONDS};
use anyhow::{Result, anyhow};
use std::env;
use tracing::warn;

/// Upstream client settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Origin-only base URL; a path component refuses startup.
    pub base_url: String,
    /// Server-side `api_key` injected when the client omits its own.
    pub api_key: String,
    /// Per-request deadline in milliseconds.
    pub timeout_ms: u64,
    /// Transient-failure retries, GET only.
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Maximum request body size in bytes; larger bodies get 413 before the
    /// handler runs.
    pub body_limit: usize,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    /// Default fresh TTL in seconds when upstream supplies none.
    pub ttl_default: u64,
    /// Default stale window in seconds.
    pub stale_ttl: u64,
    /// Disregard upstream cache-control entirely.
    pub ignore_upstream_control: bool,
    /// Path prefixes that never touch the cache.
    pub bypass_paths: Vec<String>,
    /// Detailed cache logs + `x-cache-key-hash` response header.
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct ApiKeysConfig {
    /// State-store namespace for key records and rate-limit counters.
    pub redis_prefix: String,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: u64,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Bearer token guarding `/internal`. When unset every admin request is
    /// rejected with 401.
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// The final, validated proxy configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_level: String,
    pub upstream: UpstreamConfig,
    pub proxy: ProxyConfig,
    pub cache: CacheConfig,
    pub api_keys: ApiKeysConfig,
    pub admin: AdminConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            log_level: "info".to_string(),
            upstream: UpstreamConfig {
                base_url: "http://127.0.0.1:8081".to_string(),
                api_key: String::new(),
                timeout_ms: 10_000,
                retries: 2,
            },
            proxy: ProxyConfig {
                body_limit: 1_048_576,
            },
            cache: CacheConfig {
                redis_url: "redis://127.0.0.1:6379".to_string(),
                ttl_default: 60,
                stale_ttl: 30,
                ignore_upstream_control: false,
                bypass_paths: Vec::new(),
                debug: false,
            },
            api_keys: ApiKeysConfig {
                redis_prefix: "apikeys".to_string(),
                rate_limit_window_seconds: DEFAULT_WINDOW_SECONDS,
                rate_limit_max_requests: DEFAULT_MAX_REQUESTS,
            },
            admin: AdminConfig { token: None },
            metrics: MetricsConfig {
                enabled: false,
                port: 9464,
            },
        }
    }
}

impl Config {
    /// Builds the configuration from environment variables, falling back to
    /// documented defaults where a variable is absent or unusable.
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let base_url = env::var("HTTP_CLIENT_BASE_URL")
            .map_err(|_| anyhow!("HTTP_CLIENT_BASE_URL must be set"))?;

        let config = Config {
            port: parse_or("PORT", defaults.port),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            upstream: UpstreamConfig {
                base_url,
                api_key: env::var("HTTP_CLIENT_API_KEY").unwrap_or_default(),
                timeout_ms: parse_or("HTTP_CLIENT_TIMEOUT", defaults.upstream.timeout_ms),
                retries: parse_or("HTTP_CLIENT_RETRIES", defaults.upstream.retries),
            },
            proxy: ProxyConfig {
                body_limit: parse_or("PROXY_BODY_LIMIT", defaults.proxy.body_limit),
            },
            cache: CacheConfig {
                redis_url: env::var("CACHE_REDIS_URL").unwrap_or(defaults.cache.redis_url),
                ttl_default: parse_or("CACHE_TTL_DEFAULT", defaults.cache.ttl_default),
                stale_ttl: parse_or("CACHE_STALE_TTL", defaults.cache.stale_ttl),
                ignore_upstream_control: parse_bool("CACHE_IGNORE_UPSTREAM_CONTROL"),
                bypass_paths: parse_paths("CACHE_BYPASS_PATHS"),
                debug: parse_bool("CACHE_DEBUG"),
            },
            api_keys: ApiKeysConfig {
                redis_prefix: env::var("API_KEYS_REDIS_PREFIX")
                    .unwrap_or(defaults.api_keys.redis_prefix),
                rate_limit_window_seconds: rate_limit_value(
                    "API_KEYS_RATE_LIMIT_WINDOW_SECONDS",
                    DEFAULT_WINDOW_SECONDS,
                ),
                rate_limit_max_requests: rate_limit_value(
                    "API_KEYS_RATE_LIMIT_MAX_REQUESTS",
                    DEFAULT_MAX_REQUESTS,
                ),
            },
            admin: AdminConfig {
                token: env::var("ADMIN_API_TOKEN").ok().filter(|t| !t.is_empty()),
            },
            metrics: MetricsConfig {
                enabled: parse_bool("METRICS_ENABLED"),
                port: parse_or("METRICS_PORT", defaults.metrics.port),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("PORT cannot be 0"));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(anyhow!("HTTP_CLIENT_BASE_URL cannot be empty"));
        }
        if self.upstream.timeout_ms < 100 {
            return Err(anyhow!(
                "HTTP_CLIENT_TIMEOUT must be at least 100ms, got {}",
                self.upstream.timeout_ms
            ));
        }
        if self.upstream.retries > 5 {
            return Err(anyhow!(
                "HTTP_CLIENT_RETRIES must be between 0 and 5, got {}",
                self.upstream.retries
            ));
        }
        if self.proxy.body_limit < 1024 {
            return Err(anyhow!(
                "PROXY_BODY_LIMIT must be at least 1024 bytes, got {}",
                self.proxy.body_limit
            ));
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("METRICS_PORT cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "METRICS_PORT cannot be the same as the main listen port"
                ));
            }
        }
        if self.admin.token.is_none() {
            warn!("ADMIN_API_TOKEN is not set; admin endpoints will reject every request");
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {name}={raw:?}, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_bool(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Rate-limit knobs fall back to safe defaults instead of refusing startup.
fn rate_limit_value(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) if value > 0 => value,
            _ => {
                warn!("Ignoring invalid {name}={raw:?}, using default {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_paths(name: &str) -> Vec<String> {
    env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    let mut prefix = if p.starts_with('/') {
                        p.to_string()
                    } else {
                        format!("/{p}")
                    };
                    while prefix.len() > 1 && prefix.ends_with('/') {
                        prefix.pop();
                    }
                    prefix
                })
                .collect()
        })
        .unwrap_or_default()
}
