//! Address space exposed to industrial-protocol clients.
//!
//! ```text
//! Objects
//! ├── <device_id>            instance of type <meta.name>
//! │   ├── <output>           writable variable
//! │   ├── <input>            read-only variable (unless also an output)
//! │   └── <command>          child object
//! └── ...
//! Types
//! └── <meta.name>            created the first time the name is seen
//! ```
//!
//! A type is fixed once created: later devices sharing the name are built
//! from the first descriptor seen.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use iotbridge_core::message::DeviceInfo;
use iotbridge_core::{PointValue, ValueType};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};

/// Index of the first namespace a server registers after the standard ones.
pub const FIRST_CUSTOM_NAMESPACE: u16 = 2;

/// Variable declared by an object type.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableTemplate {
    pub name: String,
    pub value_type: Option<ValueType>,
    pub writable: bool,
}

impl VariableTemplate {
    pub fn initial_value(&self) -> PointValue {
        initial_value(self.value_type)
    }
}

/// Object type built from a device descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub name: String,
    pub variables: Vec<VariableTemplate>,
    pub commands: Vec<String>,
}

impl ObjectType {
    /// Outputs first (writable), then inputs not already declared as outputs.
    pub fn from_descriptor(name: impl Into<String>, info: &DeviceInfo) -> Self {
        let mut variables: Vec<VariableTemplate> = Vec::new();
        for output in info.outputs() {
            if output.name.is_empty() || variables.iter().any(|v| v.name == output.name) {
                continue;
            }
            variables.push(VariableTemplate {
                name: output.name.clone(),
                value_type: output.value_type(),
                writable: true,
            });
        }
        for input in info.inputs() {
            if input.name.is_empty() || variables.iter().any(|v| v.name == input.name) {
                continue;
            }
            variables.push(VariableTemplate {
                name: input.name.clone(),
                value_type: input.value_type(),
                writable: false,
            });
        }
        let commands = info
            .commands()
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| c.name.clone())
            .collect();

        Self {
            name: name.into(),
            variables,
            commands,
        }
    }
}

/// Live variable on a device instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value_type: Option<ValueType>,
    pub value: PointValue,
    pub source_timestamp: Option<DateTime<Utc>>,
    pub writable: bool,
}

/// Object instance for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceNode {
    pub device_id: String,
    pub gate: Option<String>,
    pub type_name: String,
    pub variables: BTreeMap<String, Variable>,
    pub commands: Vec<String>,
}

impl DeviceNode {
    fn instantiate(device_id: &str, gate: Option<String>, object_type: &ObjectType) -> Self {
        let variables = object_type
            .variables
            .iter()
            .map(|template| {
                (
                    template.name.clone(),
                    Variable {
                        value_type: template.value_type,
                        value: template.initial_value(),
                        source_timestamp: None,
                        writable: template.writable,
                    },
                )
            })
            .collect();
        Self {
            device_id: device_id.to_string(),
            gate,
            type_name: object_type.name.clone(),
            variables,
            commands: object_type.commands.clone(),
        }
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }
}

/// Types and device instances under one namespace.
#[derive(Debug)]
pub struct AddressSpace {
    namespace_uri: String,
    namespace_index: u16,
    types: HashMap<String, Arc<ObjectType>>,
    devices: HashMap<String, DeviceNode>,
}

impl AddressSpace {
    pub fn new(namespace_uri: impl Into<String>) -> Self {
        Self {
            namespace_uri: namespace_uri.into(),
            namespace_index: FIRST_CUSTOM_NAMESPACE,
            types: HashMap::new(),
            devices: HashMap::new(),
        }
    }

    pub fn namespace_uri(&self) -> &str {
        &self.namespace_uri
    }

    pub fn namespace_index(&self) -> u16 {
        self.namespace_index
    }

    /// String node id, e.g. `ns=2;s=d1.temp`.
    pub fn node_id(&self, device_id: &str, variable: &str) -> String {
        format!("ns={};s={}.{}", self.namespace_index, device_id, variable)
    }

    /// (Re)create the instance for `device_id`.
    ///
    /// Any existing instance is removed first. Returns `None` when the
    /// descriptor has no type name, leaving the device absent.
    pub fn register_device(
        &mut self,
        device_id: &str,
        gate: Option<String>,
        info: &DeviceInfo,
    ) -> Option<&DeviceNode> {
        self.devices.remove(device_id);
        let type_name = info.type_name().filter(|name| !name.is_empty())?;

        let object_type = self
            .types
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(ObjectType::from_descriptor(type_name, info)))
            .clone();

        let node = DeviceNode::instantiate(device_id, gate, &object_type);
        self.devices.insert(device_id.to_string(), node);
        self.devices.get(device_id)
    }

    pub fn remove_device(&mut self, device_id: &str) -> bool {
        self.devices.remove(device_id).is_some()
    }

    /// Update a variable from device data, regardless of writability.
    pub fn set_value(
        &mut self,
        device_id: &str,
        variable: &str,
        value: PointValue,
        timestamp: f64,
    ) -> BridgeResult<()> {
        let var = self.variable_mut(device_id, variable)?;
        var.value = value;
        var.source_timestamp = source_timestamp(timestamp);
        Ok(())
    }

    /// Client-initiated write; only writable variables accept it.
    pub fn write_value(
        &mut self,
        device_id: &str,
        variable: &str,
        value: PointValue,
    ) -> BridgeResult<()> {
        let var = self.variable_mut(device_id, variable)?;
        if !var.writable {
            return Err(BridgeError::ReadOnly {
                device: device_id.to_string(),
                variable: variable.to_string(),
            });
        }
        var.value = value;
        var.source_timestamp = Some(Utc::now());
        Ok(())
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceNode> {
        self.devices.get(device_id)
    }

    pub fn object_type(&self, name: &str) -> Option<&ObjectType> {
        self.types.get(name).map(Arc::as_ref)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    fn variable_mut(&mut self, device_id: &str, variable: &str) -> BridgeResult<&mut Variable> {
        let node = self
            .devices
            .get_mut(device_id)
            .ok_or_else(|| BridgeError::UnknownDevice(device_id.to_string()))?;
        node.variables
            .get_mut(variable)
            .ok_or_else(|| BridgeError::UnknownVariable {
                device: device_id.to_string(),
                variable: variable.to_string(),
            })
    }
}

/// `int` starts at 0, `string` at "", anything else at 0.0.
pub fn initial_value(value_type: Option<ValueType>) -> PointValue {
    match value_type {
        Some(ValueType::Int) => PointValue::Integer(0),
        Some(ValueType::String) => PointValue::String(String::new()),
        _ => PointValue::Float(0.0),
    }
}

/// Convert a cached JSON value to the variable's type.
pub fn value_from_json(raw: &Value, value_type: Option<ValueType>) -> Option<PointValue> {
    match (raw, value_type) {
        (Value::Null, _) => None,
        (Value::String(s), _) => Some(PointValue::String(s.clone())),
        (Value::Bool(b), Some(ValueType::String)) => Some(PointValue::String(b.to_string())),
        (Value::Bool(b), _) => Some(PointValue::Boolean(*b)),
        (Value::Number(n), Some(ValueType::Int)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .map(PointValue::Integer),
        (Value::Number(n), Some(ValueType::String)) => Some(PointValue::String(n.to_string())),
        (Value::Number(n), _) => n.as_f64().map(PointValue::Float),
        (other, _) => Some(PointValue::String(other.to_string())),
    }
}

fn source_timestamp(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::<Utc>::from_timestamp_micros((secs * 1_000_000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: Value) -> DeviceInfo {
        serde_json::from_value(value).unwrap()
    }

    fn plc() -> DeviceInfo {
        descriptor(json!({
            "meta": {"name": "PLC"},
            "inputs": [
                {"name": "rpm", "vt": "int"},
                {"name": "label", "vt": "string"},
                {"name": "setpoint", "vt": "float"},
                {"name": "temp"},
            ],
            "outputs": [{"name": "setpoint", "vt": "float"}],
            "commands": [{"name": "reset"}],
        }))
    }

    #[test]
    fn test_type_from_descriptor() {
        let object_type = ObjectType::from_descriptor("PLC", &plc());
        let names: Vec<(&str, bool)> = object_type
            .variables
            .iter()
            .map(|v| (v.name.as_str(), v.writable))
            .collect();
        assert_eq!(
            names,
            vec![("setpoint", true), ("rpm", false), ("label", false), ("temp", false)]
        );
        assert_eq!(object_type.commands, vec!["reset"]);
    }

    #[test]
    fn test_initial_values_by_type() {
        let mut space = AddressSpace::new("http://opcua.thingsroot.com");
        let node = space.register_device("d1", Some("g1".into()), &plc()).unwrap();
        assert_eq!(node.variable("rpm").unwrap().value, PointValue::Integer(0));
        assert_eq!(node.variable("label").unwrap().value, PointValue::String(String::new()));
        assert_eq!(node.variable("temp").unwrap().value, PointValue::Float(0.0));
        assert_eq!(node.gate.as_deref(), Some("g1"));
    }

    #[test]
    fn test_type_shared_between_devices() {
        let mut space = AddressSpace::new("urn:test");
        space.register_device("d1", None, &plc());
        let other = descriptor(json!({"meta": {"name": "PLC"}, "inputs": [{"name": "x"}]}));
        let node = space.register_device("d2", None, &other).unwrap();

        assert!(node.variable("rpm").is_some());
        assert!(node.variable("x").is_none());
        assert_eq!(space.type_count(), 1);
    }

    #[test]
    fn test_reannounce_resets_instance() {
        let mut space = AddressSpace::new("urn:test");
        space.register_device("d1", None, &plc());
        space
            .set_value("d1", "rpm", PointValue::Integer(1500), 1_700_000_000.0)
            .unwrap();
        space.register_device("d1", None, &plc());
        assert_eq!(
            space.device("d1").unwrap().variable("rpm").unwrap().value,
            PointValue::Integer(0)
        );
    }

    #[test]
    fn test_descriptor_without_name_removes_device() {
        let mut space = AddressSpace::new("urn:test");
        space.register_device("d1", None, &plc());
        assert!(space
            .register_device("d1", None, &descriptor(json!({"inputs": []})))
            .is_none());
        assert_eq!(space.device_count(), 0);
    }

    #[test]
    fn test_set_value_records_source_timestamp() {
        let mut space = AddressSpace::new("urn:test");
        space.register_device("d1", None, &plc());
        space
            .set_value("d1", "temp", PointValue::Float(21.5), 1_700_000_000.5)
            .unwrap();
        let var = space.device("d1").unwrap().variable("temp").unwrap().clone();
        assert_eq!(var.value, PointValue::Float(21.5));
        assert_eq!(
            var.source_timestamp.unwrap().timestamp_millis(),
            1_700_000_000_500
        );

        assert!(matches!(
            space.set_value("d1", "missing", PointValue::Float(1.0), 0.0),
            Err(BridgeError::UnknownVariable { .. })
        ));
        assert!(matches!(
            space.set_value("d9", "temp", PointValue::Float(1.0), 0.0),
            Err(BridgeError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut space = AddressSpace::new("urn:test");
        space.register_device("d1", None, &plc());
        assert!(space
            .write_value("d1", "setpoint", PointValue::Float(5.0))
            .is_ok());
        assert!(matches!(
            space.write_value("d1", "rpm", PointValue::Integer(1)),
            Err(BridgeError::ReadOnly { .. })
        ));
    }

    #[test]
    fn test_value_from_json() {
        assert_eq!(
            value_from_json(&json!(21.9), Some(ValueType::Int)),
            Some(PointValue::Integer(21))
        );
        assert_eq!(
            value_from_json(&json!(3), None),
            Some(PointValue::Float(3.0))
        );
        assert_eq!(
            value_from_json(&json!(3), Some(ValueType::String)),
            Some(PointValue::String("3".into()))
        );
        assert_eq!(value_from_json(&Value::Null, None), None);
    }

    #[test]
    fn test_node_id() {
        let space = AddressSpace::new("urn:test");
        assert_eq!(space.node_id("d1", "temp"), "ns=2;s=d1.temp");
    }
}
