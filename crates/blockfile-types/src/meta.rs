use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;

/// A single metadata value.
///
/// Metadata is a closed set of JSON scalars. `Null` only ever appears in an
/// update, where it means "remove this key"; it is never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Check that the value can be stored. JSON has no encoding for NaN or
    /// infinity, so non-finite floats are rejected.
    pub fn validate(&self, key: &str) -> Result<(), TypeError> {
        match self {
            Self::Float(f) if !f.is_finite() => Err(TypeError::UnsupportedMetaValue {
                key: key.to_string(),
                reason: format!("non-finite number {f}"),
            }),
            _ => Ok(()),
        }
    }

    /// Convert a JSON value, rejecting arrays and objects.
    pub fn from_json(key: &str, value: Value) -> Result<Self, TypeError> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(TypeError::UnsupportedMetaValue {
                        key: key.to_string(),
                        reason: format!("number {n} out of range"),
                    })
                }
            }
            Value::String(s) => Ok(Self::Str(s)),
            Value::Array(_) => Err(TypeError::UnsupportedMetaValue {
                key: key.to_string(),
                reason: "arrays are not supported".into(),
            }),
            Value::Object(_) => Err(TypeError::UnsupportedMetaValue {
                key: key.to_string(),
                reason: "objects are not supported".into(),
            }),
        }
    }

    /// Non-finite floats, which never pass [`validate`](Self::validate),
    /// become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for MetaValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<MetaValue>> From<Option<T>> for MetaValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// File metadata map. Keys are kept sorted so serialized headers are stable.
pub type FileMeta = BTreeMap<String, MetaValue>;

/// Validate every value of a metadata update.
pub fn validate_meta(meta: &FileMeta) -> Result<(), TypeError> {
    meta.iter().try_for_each(|(key, value)| value.validate(key))
}

/// Build a metadata update from a JSON object.
///
/// Fails if `value` is not an object or any member is an array/object.
pub fn meta_from_json(value: Value) -> Result<FileMeta, TypeError> {
    let Value::Object(map) = value else {
        return Err(TypeError::UnsupportedMetaValue {
            key: String::new(),
            reason: "metadata update must be a JSON object".into(),
        });
    };
    map.into_iter()
        .map(|(k, v)| MetaValue::from_json(&k, v).map(|mv| (k, mv)))
        .collect()
}
