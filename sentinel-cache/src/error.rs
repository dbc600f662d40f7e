//! Error types for the sentinel cache client

use thiserror::Error;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache client error types
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed connection descriptor or configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No sentinel could name a master for the service
    #[error("No master available for service '{service}': {reason}")]
    Discovery { service: String, reason: String },

    /// Connection failed again after the single failover retry
    #[error("Connection to {endpoint} failed: {message}")]
    Connectivity { endpoint: String, message: String },

    /// A logical precondition on the key did not hold
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Lock released without (or with stale) ownership
    #[error("Lock error: {0}")]
    Lock(String),

    /// Error reply returned by the store itself
    #[error("Store error: {0}")]
    Store(String),

    /// Stored bytes do not fit the requested operation
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// Whether the failure was caused by connectivity rather than by the
    /// request itself. Callers that want stronger retry than the built-in
    /// single retry loop on this.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::Discovery { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
