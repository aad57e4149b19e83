//! Device, status and event reports pushed by gateways.

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::auth_code;
use crate::error::ApiError;

const ACCEPTED: &str = "OK!";

/// Body of `POST /device_status`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStatusReport {
    pub sn: String,
    pub status: String,
    #[serde(default)]
    pub time: Option<Value>,
}

pub async fn device_handler(headers: HeaderMap, body: Bytes) -> Result<&'static str, ApiError> {
    let auth = auth_code(&headers)?;
    let report: Value = serde_json::from_slice(&body)?;
    debug!(auth_code = auth, "Received device {}", report);
    Ok(ACCEPTED)
}

pub async fn device_status_handler(
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let auth = auth_code(&headers)?;
    let report: DeviceStatusReport = serde_json::from_slice(&body)?;
    debug!(
        auth_code = auth,
        sn = %report.sn,
        status = %report.status,
        time = ?report.time,
        "Received device status"
    );
    Ok(ACCEPTED)
}

pub async fn device_event_handler(
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let auth = auth_code(&headers)?;
    let report: Value = serde_json::from_slice(&body)?;
    debug!(auth_code = auth, "Received device event {}", report);
    Ok(ACCEPTED)
}
