//! Error types shared by the bridge crates.

use thiserror::Error;

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the bridge core.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Validation errors.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Why a single inbound message could not be routed.
///
/// Every variant is per-message: the router logs it, drops the message and
/// keeps going.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Payload is not valid JSON for its category.
    #[error("Invalid JSON in {category} payload: {reason}")]
    InvalidJson {
        category: &'static str,
        reason: String,
    },

    /// A required field is absent.
    #[error("Missing field `{field}` in {category} payload")]
    MissingField {
        category: &'static str,
        field: &'static str,
    },

    /// A field is present but has an unusable shape or value.
    #[error("Invalid field `{field}` in {category} payload: {reason}")]
    InvalidField {
        category: &'static str,
        field: &'static str,
        reason: String,
    },

    /// Payload bytes could not be decoded.
    #[error("Failed to decode {category} payload: {reason}")]
    Decode {
        category: &'static str,
        reason: String,
    },
}

impl RouteError {
    pub(crate) fn invalid_json(category: &'static str, e: serde_json::Error) -> Self {
        RouteError::InvalidJson {
            category,
            reason: e.to_string(),
        }
    }

    pub(crate) fn invalid_field(
        category: &'static str,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        RouteError::InvalidField {
            category,
            field,
            reason: reason.into(),
        }
    }

    /// Short machine-friendly kind, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::InvalidJson { .. } => "invalid_json",
            RouteError::MissingField { .. } => "missing_field",
            RouteError::InvalidField { .. } => "invalid_field",
            RouteError::Decode { .. } => "decode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_error_display() {
        let err = RouteError::MissingField {
            category: "data",
            field: "input",
        };
        assert_eq!(err.to_string(), "Missing field `input` in data payload");
        assert_eq!(err.kind(), "missing_field");
    }

    #[test]
    fn test_toml_error_becomes_config_error() {
        let err: Error = toml::from_str::<toml::Value>("= broken").unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
