// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

/// The main error enum, representing all possible failures within the proxy.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Upstream request timed out")]
    UpstreamTimeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// The HTTP status code this error maps to at the edge.
    /// Upstream transport failures collapse to 502 with a generic payload;
    /// internal detail is logged, never returned.
    pub fn status_code(&self) -> u16 {
        match self {
            ProxyError::InvalidRequest(_) => 400,
            ProxyError::Unauthorized => 401,
            ProxyError::NotFound(_) => 404,
            ProxyError::UnsupportedMediaType(_) => 415,
            ProxyError::Unavailable(_) => 503,
            ProxyError::Upstream(_) | ProxyError::UpstreamTimeout => 502,
            ProxyError::Config(_) | ProxyError::Store(_) | ProxyError::Internal(_) => 502,
        }
    }

    /// The message returned to the client. 4xx failures carry their short
    /// message; everything else is a fixed generic payload.
    pub fn public_message(&self) -> String {
        match self {
            ProxyError::InvalidRequest(m) => m.clone(),
            ProxyError::Unauthorized => "Invalid or missing API key".to_string(),
            ProxyError::NotFound(m) => m.clone(),
            ProxyError::UnsupportedMediaType(m) => m.clone(),
            ProxyError::Unavailable(m) => m.clone(),
            _ => "Upstream request failed".to_string(),
        }
    }
}

impl From<redis::RedisError> for ProxyError {
    fn from(e: redis::RedisError) -> Self {
        ProxyError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::UpstreamTimeout
        } else {
            ProxyError::Upstream(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(e: serde_json::Error) -> Self {
        ProxyError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<url::ParseError> for ProxyError {
    fn from(e: url::ParseError) -> Self {
        ProxyError::Config(format!("Invalid URL: {e}"))
    }
}
