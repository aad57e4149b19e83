//! Router and server loop.

use std::future::Future;
use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use iotbridge_core::config::UserAppSection;

use crate::handlers::{device_event_handler, device_handler, device_status_handler, hello_handler};

/// Largest accepted request body.
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;

pub fn create_router() -> Router {
    Router::new()
        .route("/", get(hello_handler))
        .route("/device", post(device_handler))
        .route("/device_status", post(device_status_handler))
        .route("/device_event", post(device_event_handler))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            MAX_REQUEST_BODY_SIZE,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve the ingestion API until `shutdown` resolves.
pub async fn run<F>(section: &UserAppSection, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind: SocketAddr = format!("{}:{}", section.host, section.port).parse()?;
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(category = "api", "Ingestion API listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router())
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!(category = "api", "Ingestion API stopped");
    Ok(())
}
