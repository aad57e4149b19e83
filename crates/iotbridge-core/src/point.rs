//! The normalized unit of data handed to stores.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value carried by a [`Point`].
///
/// The variant is fixed when the point is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

impl PointValue {
    /// JSON form of the value, as stored by the cache bridge.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PointValue::Integer(i) => serde_json::Value::from(*i),
            PointValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            PointValue::String(s) => serde_json::Value::String(s.clone()),
            PointValue::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Integer(i) => Some(*i as f64),
            PointValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointValue::Integer(v) => write!(f, "{}", v),
            PointValue::Float(v) => write!(f, "{}", v),
            PointValue::String(v) => write!(f, "{}", v),
            PointValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}

/// Declared value type of a device input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
    String,
}

impl ValueType {
    /// Parse a descriptor `vt` tag. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "int" => Some(ValueType::Int),
            "float" => Some(ValueType::Float),
            "string" => Some(ValueType::String),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurement names used for the synthetic series.
pub mod measurements {
    pub const DEVICE_CONFIG: &str = "iot_device";
    pub const DEVICE_STATUS: &str = "device_status";
    pub const DEVICE_EVENT: &str = "iot_device_event";
}

/// One normalized fact destined for a store.
///
/// Fields are private: a point cannot change once it has been built and
/// handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    measurement_name: String,
    property: String,
    device_id: String,
    /// Seconds since the Unix epoch.
    timestamp: f64,
    value: PointValue,
    quality: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    severity_level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event_kind: Option<String>,
}

impl Point {
    pub fn new(
        measurement_name: impl Into<String>,
        property: impl Into<String>,
        device_id: impl Into<String>,
        timestamp: f64,
        value: PointValue,
        quality: i64,
    ) -> Self {
        Self {
            measurement_name: measurement_name.into(),
            property: property.into(),
            device_id: device_id.into(),
            timestamp,
            value,
            quality,
            severity_level: None,
            event_kind: None,
        }
    }

    /// Attach event metadata. Only meaningful for event points.
    pub fn with_event(mut self, severity_level: Option<i64>, event_kind: Option<String>) -> Self {
        self.severity_level = severity_level;
        self.event_kind = event_kind;
        self
    }

    pub fn measurement_name(&self) -> &str {
        &self.measurement_name
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Timestamp truncated to whole milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        (self.timestamp * 1000.0) as i64
    }

    pub fn value(&self) -> &PointValue {
        &self.value
    }

    pub fn quality(&self) -> i64 {
        self.quality
    }

    pub fn severity_level(&self) -> Option<i64> {
        self.severity_level
    }

    pub fn event_kind(&self) -> Option<&str> {
        self.event_kind.as_deref()
    }

    pub fn is_event(&self) -> bool {
        self.measurement_name == measurements::DEVICE_EVENT
    }
}
