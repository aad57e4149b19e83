//! Routes transport messages into the batch pipeline.

use async_trait::async_trait;
use iotbridge_core::{BatchPipeline, InboundMessage, MessageHandler, MessageRouter};
use tracing::trace;

/// Every routed message becomes one point in the pipeline.
pub struct InfluxBridge {
    router: MessageRouter,
    pipeline: BatchPipeline,
}

impl InfluxBridge {
    pub fn new(router: MessageRouter, pipeline: BatchPipeline) -> Self {
        Self { router, pipeline }
    }

    pub fn pipeline(&self) -> &BatchPipeline {
        &self.pipeline
    }
}

#[async_trait]
impl MessageHandler for InfluxBridge {
    fn name(&self) -> &str {
        "mqtt_to_influxdb"
    }

    async fn on_message(&self, message: InboundMessage) {
        let Some(routed) = self
            .router
            .route(&message.topic, &message.payload, message.retain)
        else {
            return;
        };
        trace!(
            device_id = routed.device_id(),
            category = routed.category().as_str(),
            "Submitting point"
        );
        self.pipeline.submit(routed.into_point()).await;
    }
}
