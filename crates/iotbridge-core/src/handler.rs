//! Boundary between the transport and the bridges.

use async_trait::async_trait;

/// Topic filters every bridge subscribes to. The wildcard segment is the
/// device id.
pub const SUBSCRIBE_TOPICS: [&str; 4] = ["+/data", "+/device", "+/status", "+/event"];

/// A message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Set when the broker replays the last known value on subscribe.
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain,
        }
    }
}

/// Receives transport callbacks.
///
/// Implementations must not let a failure escape: a bad message is logged
/// and dropped, and the next one is handled normally.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handler name, used in logs.
    fn name(&self) -> &str;

    async fn on_message(&self, message: InboundMessage);

    async fn on_connect(&self) {}

    async fn on_disconnect(&self) {}
}
