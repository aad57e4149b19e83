//! Inbound payload schemas and the typed messages the router produces.
//!
//! Payloads are parsed into explicit structs at the boundary; nothing
//! downstream reaches into raw JSON by key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::point::{measurements, Point, PointValue, ValueType};

/// Topic category, the segment after the device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Data,
    Device,
    Status,
    Event,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data" => Some(Category::Data),
            "device" => Some(Category::Device),
            "status" => Some(Category::Status),
            "event" => Some(Category::Event),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Data => "data",
            Category::Device => "device",
            Category::Status => "status",
            Category::Event => "event",
        }
    }
}

/// `<device_id>/data` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DataPayload {
    /// `<input_name>/<property>`
    pub input: Option<String>,
    /// `[timestamp, value, quality, ...]`, kept loose so the cache can store
    /// whatever was published.
    #[serde(default)]
    pub data: Value,
}

/// `<device_id>/device` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DevicePayload {
    #[serde(default)]
    pub gate: Option<String>,
    #[serde(default)]
    pub info: Value,
}

/// `<device_id>/status` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub status: Option<String>,
    #[serde(default)]
    pub gate: Option<String>,
}

/// `<device_id>/event` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub gate: Option<String>,
    /// JSON-encoded `[_, body, timestamp]`, or the array itself.
    pub event: Option<Value>,
}

/// Device metadata block of a descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A declared input or output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Declaration {
    #[serde(default)]
    pub name: String,
    /// Declared value type tag (`int`, `float`, `string`).
    #[serde(default)]
    pub vt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl Declaration {
    pub fn value_type(&self) -> Option<ValueType> {
        self.vt.as_deref().and_then(ValueType::parse)
    }
}

/// A declared command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandDeclaration {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

/// Typed view of a device descriptor's `info` block.
///
/// Absent or `null` lists are treated as empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub meta: Option<DeviceMeta>,
    #[serde(default)]
    pub inputs: Option<Vec<Declaration>>,
    #[serde(default)]
    pub outputs: Option<Vec<Declaration>>,
    #[serde(default)]
    pub commands: Option<Vec<CommandDeclaration>>,
}

impl DeviceInfo {
    pub fn type_name(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.name.as_deref())
    }

    pub fn inputs(&self) -> &[Declaration] {
        self.inputs.as_deref().unwrap_or_default()
    }

    pub fn outputs(&self) -> &[Declaration] {
        self.outputs.as_deref().unwrap_or_default()
    }

    pub fn commands(&self) -> &[CommandDeclaration] {
        self.commands.as_deref().unwrap_or_default()
    }
}

/// A live data-point update.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUpdate {
    pub device_id: String,
    /// Full `<input>/<property>` path as published.
    pub input_path: String,
    pub input: String,
    /// Property as published, without any type prefix.
    pub property: String,
    /// Type tag from the resolver, only set for `value` properties.
    pub type_tag: Option<ValueType>,
    pub value: PointValue,
    pub timestamp: f64,
    pub quality: i64,
    /// The published data array, untouched.
    pub raw_data: Vec<Value>,
}

impl DataUpdate {
    /// Property name as stored, prefixed with the type tag when one applies.
    pub fn stored_property(&self) -> String {
        match self.type_tag {
            Some(tag) => format!("{}_{}", tag, self.property),
            None => self.property.clone(),
        }
    }
}

/// A data payload taken as published, for stores that keep the raw array.
///
/// Only the input path is required; `data` is not coerced or validated.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDataUpdate {
    pub device_id: String,
    /// `<input>/<property>`
    pub input_path: String,
    pub data: Value,
}

/// A device descriptor announcement.
#[derive(Debug, Clone)]
pub struct DeviceAnnouncement {
    pub device_id: String,
    pub gate: Option<String>,
    /// The `info` block as published.
    pub info: Value,
    pub descriptor: DeviceInfo,
    /// Decoded payload text.
    pub raw: String,
    pub received_at: f64,
}

/// An ONLINE/OFFLINE transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub device_id: String,
    pub gate: Option<String>,
    pub online: bool,
    pub timestamp: f64,
}

impl StatusChange {
    pub fn status_str(&self) -> &'static str {
        if self.online {
            "ONLINE"
        } else {
            "OFFLINE"
        }
    }
}

/// A device event.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    /// Device id taken from the topic.
    pub device_id: String,
    /// Reporting gate from the payload; the event is recorded against it.
    pub gate: String,
    pub body: Value,
    pub timestamp: f64,
    pub severity_level: Option<i64>,
    pub event_kind: Option<String>,
}

/// Result of routing one inbound message.
#[derive(Debug, Clone)]
pub enum RoutedMessage {
    Data(DataUpdate),
    Device(DeviceAnnouncement),
    Status(StatusChange),
    Event(DeviceEvent),
}

impl RoutedMessage {
    pub fn category(&self) -> Category {
        match self {
            RoutedMessage::Data(_) => Category::Data,
            RoutedMessage::Device(_) => Category::Device,
            RoutedMessage::Status(_) => Category::Status,
            RoutedMessage::Event(_) => Category::Event,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            RoutedMessage::Data(m) => &m.device_id,
            RoutedMessage::Device(m) => &m.device_id,
            RoutedMessage::Status(m) => &m.device_id,
            RoutedMessage::Event(m) => &m.device_id,
        }
    }

    /// Normalize into the point written to the time-series store.
    pub fn into_point(self) -> Point {
        match self {
            RoutedMessage::Data(update) => {
                let property = update.stored_property();
                Point::new(
                    update.input,
                    property,
                    update.device_id,
                    update.timestamp,
                    update.value,
                    update.quality,
                )
            }
            RoutedMessage::Device(device) => Point::new(
                measurements::DEVICE_CONFIG,
                "cfg",
                device.device_id,
                device.received_at,
                PointValue::String(device.raw),
                0,
            ),
            RoutedMessage::Status(status) => Point::new(
                measurements::DEVICE_STATUS,
                "online",
                status.device_id,
                status.timestamp,
                PointValue::Boolean(status.online),
                0,
            ),
            RoutedMessage::Event(event) => Point::new(
                measurements::DEVICE_EVENT,
                "event",
                event.gate,
                event.timestamp,
                PointValue::String(event.body.to_string()),
                0,
            )
            .with_event(event.severity_level, event.event_kind),
        }
    }
}
