//! Time-series store: InfluxDB over HTTP.

pub mod bridge;
pub mod client;
pub mod line_protocol;

pub use bridge::InfluxBridge;
pub use client::{InfluxConfig, InfluxSink};
pub use line_protocol::{encode_point, FieldValue};
