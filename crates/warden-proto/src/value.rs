//! Runtime value types for filter operands, bound parameters, and results.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Largest integer that survives a round trip through an IEEE-754 double.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// A record in a result tree, keyed by output field name in selection order.
pub type Item = IndexMap<String, Value>;

/// A runtime value.
///
/// Scalars are what the relational driver binds and returns. `List` and
/// `Object` only appear in filter operands (`_in`, `_between`) and in the
/// nested result tree assembled by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// Integer outside the 64-bit range, carried as its decimal text.
    ///
    /// Drivers bind these as opaque strings rather than coercing them.
    BigInt(String),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// UUID.
    Uuid(Uuid),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested record.
    Object(Item),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as f64, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    /// Try to get as a nested record.
    pub fn as_object(&self) -> Option<&Item> {
        match self {
            Value::Object(item) => Some(item),
            _ => None,
        }
    }

    /// Try to get as a mutable nested record.
    pub fn as_object_mut(&mut self) -> Option<&mut Item> {
        match self {
            Value::Object(item) => Some(item),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::BigInt(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    /// Canonical text of a scalar value.
    ///
    /// Two values with the same key compare equal under the loose equality
    /// used to match foreign keys against primary keys: `Int(5)` and
    /// `String("5")` share the key `"5"`. Lists and objects fall back to
    /// their JSON encoding.
    pub fn key(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::BigInt(s) => s.clone(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            Value::String(s) => s.clone(),
            Value::Uuid(u) => u.hyphenated().to_string(),
            Value::List(_) | Value::Object(_) => self.to_json().to_string(),
        }
    }

    /// Convert from a JSON value.
    ///
    /// Integers that do not fit in an `i64` become [`Value::BigInt`] instead
    /// of being rounded through a float.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::BigInt(u.to_string())
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(values) => {
                Value::List(values.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert into a JSON value.
    ///
    /// Integers outside the safe double range are emitted as strings so that
    /// JSON consumers never silently lose precision.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) if i.abs() > MAX_SAFE_INTEGER => serde_json::Value::String(i.to_string()),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::BigInt(s) => serde_json::Value::String(s.clone()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Uuid(u) => serde_json::Value::String(u.hyphenated().to_string()),
            Value::List(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::Object(item) => serde_json::Value::Object(
                item.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from_json)
    }
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Item> for Value {
    fn from(v: Item) -> Self {
        Value::Object(v)
    }
}
