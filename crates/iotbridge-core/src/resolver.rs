//! Value coercion driven by declared input types.
//!
//! Device descriptors declare a value type (`vt`) per input. The resolver
//! learns those bindings and uses them to coerce untyped data values; when
//! nothing is known about an input, numbers are stored as floats.
//!
//! Bindings are only ever added or overwritten. Memory grows with the number
//! of distinct (device, input) pairs seen over the process lifetime.

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::message::DeviceInfo;
use crate::point::{PointValue, ValueType};

/// Outcome of resolving one raw value.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    /// Tag to prefix the stored property with, if any.
    pub type_tag: Option<ValueType>,
    pub value: PointValue,
}

/// Raw value could not be cast to the required type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot coerce {raw} to {target}")]
pub struct CoercionError {
    pub raw: String,
    pub target: ValueType,
}

/// Concurrent map of `(device_id, input_name)` to declared type.
#[derive(Debug, Default)]
pub struct ValueResolver {
    bindings: DashMap<(String, String), ValueType>,
}

impl ValueResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coerce `raw` for `input_name` on `device_id`.
    ///
    /// - strings are returned unchanged, tagged `string`
    /// - `int` bindings truncate toward zero, tagged `int`
    /// - `string` bindings stringify, tagged `string`
    /// - `float` bindings and unbound inputs cast to float, untagged
    pub fn resolve(
        &self,
        device_id: &str,
        input_name: &str,
        raw: &Value,
    ) -> Result<Resolved, CoercionError> {
        if let Value::String(s) = raw {
            return Ok(Resolved {
                type_tag: Some(ValueType::String),
                value: PointValue::String(s.clone()),
            });
        }

        match self.binding(device_id, input_name) {
            Some(ValueType::Int) => Ok(Resolved {
                type_tag: Some(ValueType::Int),
                value: PointValue::Integer(cast_int(raw)?),
            }),
            Some(ValueType::String) => Ok(Resolved {
                type_tag: Some(ValueType::String),
                value: PointValue::String(cast_string(raw)),
            }),
            Some(ValueType::Float) | None => Ok(Resolved {
                type_tag: None,
                value: PointValue::Float(cast_float(raw)?),
            }),
        }
    }

    /// Learn bindings from a device descriptor.
    ///
    /// Every declared input and output carrying a recognised `vt` overwrites
    /// its binding. Returns the number of bindings written.
    pub fn update_bindings(&self, device_id: &str, info: &DeviceInfo) -> usize {
        let mut updated = 0;
        for decl in info.inputs().iter().chain(info.outputs()) {
            if decl.name.is_empty() {
                continue;
            }
            if let Some(vt) = decl.value_type() {
                self.bindings
                    .insert((device_id.to_string(), decl.name.clone()), vt);
                updated += 1;
            }
        }
        if updated > 0 {
            debug!(
                device_id,
                updated,
                total = self.bindings.len(),
                "Updated value type bindings"
            );
        }
        updated
    }

    pub fn binding(&self, device_id: &str, input_name: &str) -> Option<ValueType> {
        self.bindings
            .get(&(device_id.to_string(), input_name.to_string()))
            .map(|vt| *vt)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

fn cast_int(raw: &Value) -> Result<i64, CoercionError> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() {
                    Ok(f.trunc() as i64)
                } else {
                    Err(coercion_error(raw, ValueType::Int))
                }
            } else {
                Err(coercion_error(raw, ValueType::Int))
            }
        }
        Value::Bool(b) => Ok(i64::from(*b)),
        _ => Err(coercion_error(raw, ValueType::Int)),
    }
}

fn cast_float(raw: &Value) -> Result<f64, CoercionError> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| coercion_error(raw, ValueType::Float)),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => Err(coercion_error(raw, ValueType::Float)),
    }
}

fn cast_string(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn coercion_error(raw: &Value, target: ValueType) -> CoercionError {
    CoercionError {
        raw: raw.to_string(),
        target,
    }
}
