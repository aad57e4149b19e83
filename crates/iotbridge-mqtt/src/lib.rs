//! MQTT transport for the bridges.
//!
//! Connects with rumqttc, subscribes to the four bridge topic filters on
//! every CONNACK and hands each publish, with its retain flag, to a
//! [`MessageHandler`](iotbridge_core::MessageHandler).

pub mod transport;

pub use transport::{MqttConfig, MqttError, MqttTransport};
