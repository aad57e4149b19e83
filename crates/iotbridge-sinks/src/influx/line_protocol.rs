//! InfluxDB line protocol encoding.
//!
//! ```text
//! measurement,device=<id> <property>=<value>,quality=<q>i[,level=<l>i] <timestamp_ms>
//! ```

use std::fmt;

use iotbridge_core::{Point, PointValue};

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    /// Format this value for line protocol.
    ///
    /// Integers carry an `i` suffix; strings are quoted with `\` and `"`
    /// escaped.
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }

    /// Line protocol has no representation for NaN or infinity.
    pub fn is_encodable(&self) -> bool {
        match self {
            FieldValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl From<&PointValue> for FieldValue {
    fn from(value: &PointValue) -> Self {
        match value {
            PointValue::Integer(v) => FieldValue::Integer(*v),
            PointValue::Float(v) => FieldValue::Float(*v),
            PointValue::String(v) => FieldValue::String(v.clone()),
            PointValue::Boolean(v) => FieldValue::Boolean(*v),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line_protocol())
    }
}

/// Encode one point as a line, or `None` when its value is not encodable.
pub fn encode_point(point: &Point) -> Option<String> {
    let value = FieldValue::from(point.value());
    if !value.is_encodable() {
        return None;
    }

    let mut fields = vec![
        (point.property(), value),
        ("quality", FieldValue::Integer(point.quality())),
    ];
    if let Some(level) = point.severity_level() {
        fields.push(("level", FieldValue::Integer(level)));
    }

    Some(format_line(
        point.measurement_name(),
        &[("device", point.device_id())],
        &fields,
        point.timestamp_millis(),
    ))
}

/// Format one line. Tags are sorted by key; fields keep their order.
pub fn format_line(
    measurement: &str,
    tags: &[(&str, &str)],
    fields: &[(&str, FieldValue)],
    timestamp: i64,
) -> String {
    let mut line = escape_measurement(measurement);

    let mut sorted_tags: Vec<_> = tags.iter().collect();
    sorted_tags.sort_by_key(|(k, _)| *k);
    for (key, value) in sorted_tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }

    line.push(' ');
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&value.to_line_protocol());
    }

    line.push(' ');
    line.push_str(&timestamp.to_string());
    line
}

/// Spaces and commas are escaped in measurement names.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys also escape `=`.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_formats() {
        assert_eq!(FieldValue::Float(3.5).to_line_protocol(), "3.5");
        assert_eq!(FieldValue::Integer(42).to_line_protocol(), "42i");
        assert_eq!(FieldValue::Boolean(true).to_line_protocol(), "true");
        assert_eq!(
            FieldValue::String("say \"hi\"".to_string()).to_line_protocol(),
            "\"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_encode_data_point() {
        let point = Point::new("temp", "int_value", "d1", 1000.5, PointValue::Integer(21), 0);
        assert_eq!(
            encode_point(&point).unwrap(),
            "temp,device=d1 int_value=21i,quality=0i 1000500"
        );
    }

    #[test]
    fn test_encode_event_point_with_level() {
        let point = Point::new(
            "iot_device_event",
            "event",
            "gate 1",
            2.0,
            PointValue::String(r#"{"info":"x"}"#.to_string()),
            0,
        )
        .with_event(Some(3), Some("alarm".to_string()));

        assert_eq!(
            encode_point(&point).unwrap(),
            r#"iot_device_event,device=gate\ 1 event="{\"info\":\"x\"}",quality=0i,level=3i 2000"#
        );
    }

    #[test]
    fn test_escaping() {
        let line = format_line(
            "my measurement,x",
            &[("tag key", "a=b")],
            &[("field,key", FieldValue::Float(1.0))],
            5,
        );
        assert_eq!(line, r"my\ measurement\,x,tag\ key=a\=b field\,key=1 5");
    }

    #[test]
    fn test_nan_is_not_encodable() {
        let point = Point::new("m", "value", "d1", 1.0, PointValue::Float(f64::NAN), 0);
        assert!(encode_point(&point).is_none());
    }
}
