//! Core types for the ThingsRoot IoT bridges.
//!
//! Inbound transport messages flow through this crate:
//!
//! ```text
//! InboundMessage ──► MessageRouter ──► RoutedMessage ──► Point ──► BatchPipeline ──► PointSink
//!                         │
//!                         └──► ValueResolver (bindings learned from device descriptors)
//! ```
//!
//! - **ValueResolver**: coerces untyped values using declared input types
//! - **MessageRouter**: topic parsing and per-category normalization
//! - **BatchPipeline**: bounded intake, timed flush, drop-oldest pending queue
//! - **PointSink**: store adapter interface

pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod pipeline;
pub mod point;
pub mod resolver;
pub mod router;
pub mod sink;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::BridgeConfig;
pub use error::{Error, Result, RouteError};
pub use handler::{InboundMessage, MessageHandler, SUBSCRIBE_TOPICS};
pub use message::{
    Category, DataUpdate, DeviceAnnouncement, DeviceEvent, DeviceInfo, RawDataUpdate,
    RoutedMessage, StatusChange,
};
pub use pipeline::{BatchPipeline, PipelineConfig, PipelineHandle, PipelineStats};
pub use point::{Point, PointValue, ValueType};
pub use resolver::{Resolved, ValueResolver};
pub use router::MessageRouter;
pub use sink::{MemorySink, PointSink, SinkError, SinkResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
