//! Error types for the Wikitop service

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving top-article queries
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Upstream fetch failed or timed out after retries; nothing was cached
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Lock could not be acquired, or its release observed, within bounds
    #[error("Timed out waiting for lock: {key}")]
    LockTimeout { key: String },

    /// Requested article does not appear in the period
    #[error("Not found: {0}")]
    NotFound(String),

    /// Week, month, or date outside the accepted range
    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    /// Request path or query could not be interpreted
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Upstream HTTP connection error
    #[error("Upstream connection error: {0}")]
    UpstreamConnection(#[source] reqwest::Error),

    /// Upstream response could not be decoded
    #[error("Failed to parse upstream response: {0}")]
    UpstreamResponseParse(String),

    /// Shared store or lock backend error
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Cache entry encoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_)
                | Error::UpstreamConnection(_)
                | Error::LockTimeout { .. }
                | Error::Store(_)
        )
    }

    /// Whether the failure originates at or beyond the upstream boundary.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_)
                | Error::UpstreamConnection(_)
                | Error::UpstreamResponseParse(_)
                | Error::LockTimeout { .. }
        )
    }
}
