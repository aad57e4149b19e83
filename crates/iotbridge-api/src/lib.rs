//! HTTP ingestion surface for device reports.
//!
//! Gateways that cannot speak MQTT push the same device, status and event
//! notifications over plain HTTP. Every report must carry an
//! `AuthorizationCode` header.

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use handlers::{DeviceStatusReport, AUTH_HEADER};
pub use server::{create_router, run, MAX_REQUEST_BODY_SIZE};
