//! Error types for the store adapters and bridges.

use iotbridge_core::SinkError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key/value cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unexpected value at {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while a bridge applies a message to its store.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown variable {variable} on device {device}")]
    UnknownVariable { device: String, variable: String },

    #[error("Variable {variable} on device {device} is read-only")]
    ReadOnly { device: String, variable: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_error_from_cache() {
        let err: BridgeError = CacheError::Connection("refused".to_string()).into();
        assert_eq!(err.to_string(), "Cache error: Connection error: refused");
    }

    #[test]
    fn test_read_only_display() {
        let err = BridgeError::ReadOnly {
            device: "d1".to_string(),
            variable: "temp".to_string(),
        };
        assert!(err.to_string().contains("read-only"));
    }
}
