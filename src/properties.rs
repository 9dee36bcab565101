use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// A typed property value. Exactly one of the four supported kinds is stored
/// per key, and the variant doubles as the type discriminator, so a value
/// reads back with the type it was written with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl PropertyValue {
    pub fn discriminator(&self) -> &'static str {
        match self {
            PropertyValue::Boolean(_) => "boolean",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Real(_) => "real",
            PropertyValue::Text(_) => "text",
        }
    }

    /// Narrow an arbitrary JSON value, as supplied by an ingestion
    /// collaborator, to one of the supported kinds. Nulls, arrays and
    /// objects are rejected.
    pub fn from_json(key: &str, value: &serde_json::Value) -> Result<Self, CatalogError> {
        match value {
            serde_json::Value::Bool(b) => Ok(PropertyValue::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PropertyValue::Integer(i))
                } else if let Some(r) = n.as_f64() {
                    Ok(PropertyValue::Real(r))
                } else {
                    Err(CatalogError::UnsupportedPropertyType {
                        key: key.to_string(),
                        found: n.to_string(),
                    })
                }
            }
            serde_json::Value::String(s) => Ok(PropertyValue::Text(s.clone())),
            other => Err(CatalogError::UnsupportedPropertyType {
                key: key.to_string(),
                found: kind_of(other).to_string(),
            }),
        }
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Real(r) => write!(f, "{r}"),
            PropertyValue::Text(t) => write!(f, "{t}"),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Real(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

/// Sparse typed key-value storage attachable to an entity. One slot per key,
/// a later `set` overwrites whatever kind was there before.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyStore {
    entries: BTreeMap<String, PropertyValue>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact typed equality: the stored discriminator and the stored value
    /// must both match, so an integer 1 never matches a text "1".
    pub fn matches(&self, key: &str, value: &PropertyValue) -> bool {
        self.entries.get(key) == Some(value)
    }
}
