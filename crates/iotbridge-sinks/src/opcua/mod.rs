//! Industrial-protocol surface: an OPC UA style address space fed by device
//! traffic, with client writes forwarded to the IoT platform.
//!
//! The wire server is not part of this crate; it serves the
//! [`AddressSpace`] kept here.

pub mod address_space;
pub mod bridge;
pub mod user_api;

pub use address_space::{AddressSpace, DeviceNode, ObjectType, Variable, VariableTemplate};
pub use bridge::OpcUaBridge;
pub use user_api::{ForwardedOutput, OutputForwarder, RecordingForwarder, UserApi};
