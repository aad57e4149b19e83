//! Store adapters and the bridges that feed them.
//!
//! - [`influx`]: time-series points through the batch pipeline
//! - [`cache`]: device state mirrored into Redis namespaces
//! - [`opcua`]: address space for industrial-protocol clients

pub mod cache;
pub mod error;
pub mod influx;
pub mod opcua;

pub use error::{BridgeError, BridgeResult, CacheError, CacheResult};
