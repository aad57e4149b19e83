//! Message router: topic parsing and per-category normalization.
//!
//! ## Topic Format
//!
//! `<device_id>/<category>` where category is one of `data`, `device`,
//! `status`, `event`. Anything else is transport noise and is ignored.
//!
//! Each message is handled in isolation: a bad payload is logged with its
//! error kind and dropped, and the next message routes normally.

use std::io::Read;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::RouteError;
use crate::message::{
    Category, DataPayload, DataUpdate, DeviceAnnouncement, DeviceEvent, DeviceInfo,
    DevicePayload, EventPayload, RawDataUpdate, RoutedMessage, StatusChange, StatusPayload,
};
use crate::point::PointValue;
use crate::resolver::ValueResolver;

/// Split a topic into `(device_id, category)`.
///
/// The device id is everything before the first `/`; the remainder must be
/// a known category.
pub fn parse_topic(topic: &str) -> Option<(&str, Category)> {
    let (device_id, rest) = topic.split_once('/')?;
    if device_id.is_empty() || rest.is_empty() {
        return None;
    }
    Category::parse(rest).map(|category| (device_id, category))
}

/// Routes inbound transport messages to typed [`RoutedMessage`]s.
pub struct MessageRouter {
    resolver: Arc<ValueResolver>,
    clock: SharedClock,
}

impl MessageRouter {
    pub fn new(resolver: Arc<ValueResolver>, clock: SharedClock) -> Self {
        Self { resolver, clock }
    }

    pub fn resolver(&self) -> &Arc<ValueResolver> {
        &self.resolver
    }

    /// Route one message, logging and swallowing per-message failures.
    pub fn route(&self, topic: &str, payload: &[u8], retained: bool) -> Option<RoutedMessage> {
        match self.try_route(topic, payload, retained) {
            Ok(routed) => routed,
            Err(e) => {
                warn!(
                    topic,
                    kind = e.kind(),
                    payload = %String::from_utf8_lossy(payload),
                    "Dropping message: {}",
                    e
                );
                None
            }
        }
    }

    /// Take a live `data` message as published, without coercion.
    ///
    /// Only the JSON shape and the `input` field are checked, so values the
    /// time-series path rejects (`null`, arrays, short data arrays) still
    /// come through. Other categories and retained messages yield `None`.
    pub fn route_raw_data(
        &self,
        topic: &str,
        payload: &[u8],
        retained: bool,
    ) -> Option<RawDataUpdate> {
        let (device_id, category) = parse_topic(topic)?;
        if category != Category::Data || retained {
            return None;
        }

        let text = String::from_utf8_lossy(payload);
        let parsed: DataPayload = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                let e = RouteError::invalid_json("data", e);
                warn!(topic, kind = e.kind(), payload = %text, "Dropping message: {}", e);
                return None;
            }
        };
        let Some(input_path) = parsed.input.filter(|input| !input.is_empty()) else {
            warn!(topic, payload = %text, "Dropping data message without input");
            return None;
        };

        Some(RawDataUpdate {
            device_id: device_id.to_string(),
            input_path,
            data: parsed.data,
        })
    }

    /// Route one message, surfacing why it could not be routed.
    ///
    /// `Ok(None)` means the message was intentionally ignored (unknown
    /// topic, retained data or event, unrecognised status).
    pub fn try_route(
        &self,
        topic: &str,
        payload: &[u8],
        retained: bool,
    ) -> Result<Option<RoutedMessage>, RouteError> {
        let Some((device_id, category)) = parse_topic(topic) else {
            debug!(topic, "Ignoring message on unrecognised topic");
            return Ok(None);
        };

        match category {
            Category::Data => {
                if retained {
                    return Ok(None);
                }
                self.route_data(device_id, payload).map(Some)
            }
            Category::Device => self.route_device(device_id, payload).map(Some),
            Category::Status => self.route_status(device_id, payload),
            Category::Event => {
                if retained {
                    return Ok(None);
                }
                self.route_event(device_id, payload).map(Some)
            }
        }
    }

    fn route_data(&self, device_id: &str, payload: &[u8]) -> Result<RoutedMessage, RouteError> {
        const CATEGORY: &str = "data";

        let text = String::from_utf8_lossy(payload);
        let parsed: DataPayload =
            serde_json::from_str(&text).map_err(|e| RouteError::invalid_json(CATEGORY, e))?;

        let input_path = parsed.input.ok_or(RouteError::MissingField {
            category: CATEGORY,
            field: "input",
        })?;
        let (input, property) = input_path
            .split_once('/')
            .filter(|(name, prop)| !name.is_empty() && !prop.is_empty())
            .ok_or_else(|| {
                RouteError::invalid_field(CATEGORY, "input", "expected <input>/<property>")
            })?;

        let items = parsed
            .data
            .as_array()
            .ok_or_else(|| RouteError::invalid_field(CATEGORY, "data", "expected an array"))?;
        if items.len() < 3 {
            return Err(RouteError::invalid_field(
                CATEGORY,
                "data",
                format!("expected [timestamp, value, quality], got {} items", items.len()),
            ));
        }
        let timestamp = items[0]
            .as_f64()
            .ok_or_else(|| RouteError::invalid_field(CATEGORY, "data", "timestamp is not numeric"))?;
        let quality = as_quality(&items[2])
            .ok_or_else(|| RouteError::invalid_field(CATEGORY, "data", "quality is not numeric"))?;
        let raw_value = &items[1];

        let (type_tag, value) = if property == "value" {
            let resolved = self
                .resolver
                .resolve(device_id, input, raw_value)
                .map_err(|e| RouteError::invalid_field(CATEGORY, "data", e.to_string()))?;
            (resolved.type_tag, resolved.value)
        } else {
            (None, PointValue::String(stringify(raw_value)))
        };

        Ok(RoutedMessage::Data(DataUpdate {
            device_id: device_id.to_string(),
            input: input.to_string(),
            property: property.to_string(),
            type_tag,
            value,
            timestamp,
            quality,
            raw_data: items.clone(),
            input_path: input_path.clone(),
        }))
    }

    fn route_device(&self, device_id: &str, payload: &[u8]) -> Result<RoutedMessage, RouteError> {
        const CATEGORY: &str = "device";

        let raw = decode_descriptor(payload)?;
        let parsed: DevicePayload =
            serde_json::from_str(&raw).map_err(|e| RouteError::invalid_json(CATEGORY, e))?;
        let descriptor: DeviceInfo = if parsed.info.is_null() {
            DeviceInfo::default()
        } else {
            serde_json::from_value(parsed.info.clone())
                .map_err(|e| RouteError::invalid_field(CATEGORY, "info", e.to_string()))?
        };

        debug!(device_id, gate = ?parsed.gate, "Device descriptor received");
        self.resolver.update_bindings(device_id, &descriptor);

        Ok(RoutedMessage::Device(DeviceAnnouncement {
            device_id: device_id.to_string(),
            gate: parsed.gate,
            info: parsed.info,
            descriptor,
            raw,
            received_at: self.clock.now_secs(),
        }))
    }

    fn route_status(
        &self,
        device_id: &str,
        payload: &[u8],
    ) -> Result<Option<RoutedMessage>, RouteError> {
        const CATEGORY: &str = "status";

        let text = String::from_utf8_lossy(payload);
        let parsed: StatusPayload =
            serde_json::from_str(&text).map_err(|e| RouteError::invalid_json(CATEGORY, e))?;
        let status = parsed.status.ok_or(RouteError::MissingField {
            category: CATEGORY,
            field: "status",
        })?;

        let online = match status.as_str() {
            "ONLINE" => true,
            "OFFLINE" => false,
            other => {
                debug!(device_id, status = other, "Ignoring unrecognised status");
                return Ok(None);
            }
        };

        Ok(Some(RoutedMessage::Status(StatusChange {
            device_id: device_id.to_string(),
            gate: parsed.gate,
            online,
            timestamp: self.clock.now_secs(),
        })))
    }

    fn route_event(&self, device_id: &str, payload: &[u8]) -> Result<RoutedMessage, RouteError> {
        const CATEGORY: &str = "event";

        let text = String::from_utf8_lossy(payload);
        let parsed: EventPayload =
            serde_json::from_str(&text).map_err(|e| RouteError::invalid_json(CATEGORY, e))?;
        let event = parsed.event.ok_or(RouteError::MissingField {
            category: CATEGORY,
            field: "event",
        })?;

        let event = match event {
            Value::String(encoded) => serde_json::from_str::<Value>(&encoded)
                .map_err(|e| RouteError::invalid_field(CATEGORY, "event", e.to_string()))?,
            other => other,
        };
        let items = event
            .as_array()
            .filter(|items| items.len() >= 2)
            .ok_or_else(|| {
                RouteError::invalid_field(CATEGORY, "event", "expected [_, body, timestamp]")
            })?;
        let body = items[1].clone();

        let timestamp = match items.get(2).and_then(Value::as_f64) {
            Some(ts) => {
                if ts == 0.0 {
                    warn!(device_id, "Event carries a zero timestamp, keeping it as-is");
                }
                ts
            }
            None => self.clock.now_secs(),
        };

        let severity_level = body.get("level").and_then(as_quality);
        let event_kind = body.get("type").and_then(|t| match t {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });

        Ok(RoutedMessage::Event(DeviceEvent {
            device_id: device_id.to_string(),
            gate: parsed.gate.unwrap_or_else(|| device_id.to_string()),
            body,
            timestamp,
            severity_level,
            event_kind,
        }))
    }
}

/// Decode a descriptor payload, inflating it first when it is zlib-compressed.
fn decode_descriptor(payload: &[u8]) -> Result<String, RouteError> {
    if looks_like_zlib(payload) {
        let mut inflated = Vec::new();
        if ZlibDecoder::new(payload).read_to_end(&mut inflated).is_ok() {
            return Ok(String::from_utf8_lossy(&inflated).into_owned());
        }
        debug!("Descriptor has a zlib header but does not inflate, using it raw");
    }
    if payload.is_empty() {
        return Err(RouteError::Decode {
            category: "device",
            reason: "empty payload".to_string(),
        });
    }
    Ok(String::from_utf8_lossy(payload).into_owned())
}

fn looks_like_zlib(payload: &[u8]) -> bool {
    match payload {
        [cmf, flg, ..] => *cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}

fn as_quality(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::point::ValueType;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use serde_json::json;
    use std::io::Write;

    fn router() -> MessageRouter {
        MessageRouter::new(
            Arc::new(ValueResolver::new()),
            Arc::new(ManualClock::new(5000.0)),
        )
    }

    #[test]
    fn test_parse_topic() {
        assert_eq!(parse_topic("d1/data"), Some(("d1", Category::Data)));
        assert_eq!(parse_topic("d1/event"), Some(("d1", Category::Event)));
        assert_eq!(parse_topic("d1/other"), None);
        assert_eq!(parse_topic("d1/data/extra"), None);
        assert_eq!(parse_topic("/data"), None);
        assert_eq!(parse_topic("nodelimiter"), None);
    }

    #[test]
    fn test_data_non_value_property_is_stringified() {
        let router = router();
        let payload = json!({"input": "temp/unit", "data": [10.0, 21.5, 0]}).to_string();

        let Some(RoutedMessage::Data(update)) = router.route("d1/data", payload.as_bytes(), false)
        else {
            panic!("expected data update");
        };
        assert_eq!(update.property, "unit");
        assert_eq!(update.type_tag, None);
        assert_eq!(update.value, PointValue::String("21.5".into()));
    }

    #[test]
    fn test_data_missing_input_is_dropped() {
        let router = router();
        let payload = json!({"data": [10.0, 1, 0]}).to_string();

        let err = router
            .try_route("d1/data", payload.as_bytes(), false)
            .unwrap_err();
        assert!(matches!(err, RouteError::MissingField { field: "input", .. }));
        assert!(router.route("d1/data", payload.as_bytes(), false).is_none());
    }

    #[test]
    fn test_data_short_array_is_rejected() {
        let router = router();
        let payload = json!({"input": "a/value", "data": [10.0, 1]}).to_string();
        let err = router
            .try_route("d1/data", payload.as_bytes(), false)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_field");
    }

    #[test]
    fn test_raw_data_keeps_uncoercible_values() {
        let router = router();
        for data in [json!([1.0, null, 0]), json!([1.0, [1, 2], 0]), json!([10.0, 1])] {
            let payload = json!({"input": "a/value", "data": data.clone()}).to_string();
            assert!(router.route("d1/data", payload.as_bytes(), false).is_none());

            let raw = router
                .route_raw_data("d1/data", payload.as_bytes(), false)
                .unwrap();
            assert_eq!(raw.device_id, "d1");
            assert_eq!(raw.input_path, "a/value");
            assert_eq!(raw.data, data);
        }
    }

    #[test]
    fn test_raw_data_ignores_retained_and_other_topics() {
        let router = router();
        let payload = json!({"input": "a/value", "data": [1.0, 2.0, 0]}).to_string();
        assert!(router.route_raw_data("d1/data", payload.as_bytes(), true).is_none());
        assert!(router.route_raw_data("d1/event", payload.as_bytes(), false).is_none());
        assert!(router.route_raw_data("d1/data", b"{oops", false).is_none());
        assert!(router
            .route_raw_data("d1/data", br#"{"data": [1.0, 2.0, 0]}"#, false)
            .is_none());
    }

    #[test]
    fn test_compressed_descriptor() {
        let router = router();
        let body = json!({
            "gate": "g1",
            "info": {"meta": {"name": "PLC"}, "inputs": [{"name": "rpm", "vt": "int"}]},
        })
        .to_string();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let Some(RoutedMessage::Device(device)) = router.route("d1/device", &compressed, false)
        else {
            panic!("expected device announcement");
        };
        assert_eq!(device.gate.as_deref(), Some("g1"));
        assert_eq!(device.raw, body);
        assert_eq!(device.received_at, 5000.0);
        assert_eq!(router.resolver().binding("d1", "rpm"), Some(ValueType::Int));
    }

    #[test]
    fn test_status_values() {
        let router = router();
        let online = router.route("g1/status", br#"{"status":"ONLINE","gate":"g1"}"#, false);
        assert!(matches!(online, Some(RoutedMessage::Status(StatusChange { online: true, .. }))));

        let offline = router.route("g1/status", br#"{"status":"OFFLINE"}"#, true);
        assert!(matches!(offline, Some(RoutedMessage::Status(StatusChange { online: false, .. }))));

        assert!(router
            .route("g1/status", br#"{"status":"UNKNOWN"}"#, false)
            .is_none());
    }

    #[test]
    fn test_event_timestamp_fallback() {
        let router = router();
        let encoded = json!([0, {"level": 3, "type": "alarm", "info": "hi"}, null]).to_string();
        let payload = json!({"gate": "g1", "event": encoded}).to_string();

        let Some(RoutedMessage::Event(event)) = router.route("d1/event", payload.as_bytes(), false)
        else {
            panic!("expected event");
        };
        assert_eq!(event.timestamp, 5000.0);
        assert_eq!(event.gate, "g1");
        assert_eq!(event.severity_level, Some(3));
        assert_eq!(event.event_kind.as_deref(), Some("alarm"));
    }

    #[test]
    fn test_event_zero_timestamp_is_preserved() {
        let router = router();
        let payload = json!({"gate": "g1", "event": [0, {"info": "boot"}, 0]}).to_string();

        let Some(RoutedMessage::Event(event)) = router.route("d1/event", payload.as_bytes(), false)
        else {
            panic!("expected event");
        };
        assert_eq!(event.timestamp, 0.0);
        assert_eq!(event.severity_level, None);
    }

    #[test]
    fn test_retained_event_is_ignored() {
        let router = router();
        let payload = json!({"gate": "g1", "event": [0, {}, 1.0]}).to_string();
        assert!(router.route("d1/event", payload.as_bytes(), true).is_none());
    }

    #[test]
    fn test_invalid_utf8_is_tolerated() {
        let router = router();
        let mut payload = br#"{"input":"name/value","data":[1.0,""#.to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        payload.extend_from_slice(br#"",0]}"#);

        let Some(RoutedMessage::Data(update)) = router.route("d1/data", &payload, false) else {
            panic!("expected data update");
        };
        assert_eq!(update.type_tag, Some(ValueType::String));
    }
}
