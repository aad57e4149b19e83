//! Request handlers.

pub mod basic;
pub mod ingest;

use axum::http::HeaderMap;

use crate::error::ApiError;

pub use basic::hello_handler;
pub use ingest::{device_event_handler, device_handler, device_status_handler, DeviceStatusReport};

/// Header every ingestion request must carry.
pub const AUTH_HEADER: &str = "AuthorizationCode";

/// Pull the auth code out of the request headers.
pub(crate) fn auth_code(headers: &HeaderMap) -> Result<&str, ApiError> {
    let Some(value) = headers.get(AUTH_HEADER) else {
        tracing::warn!("{} is required in headers", AUTH_HEADER);
        return Err(ApiError::MissingAuthorization);
    };
    // A present but non-ASCII header still counts as supplied.
    Ok(value.to_str().unwrap_or_default())
}
