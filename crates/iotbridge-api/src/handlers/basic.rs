//! Basic handlers.

/// Liveness banner.
pub async fn hello_handler() -> &'static str {
    "Hello World!"
}
