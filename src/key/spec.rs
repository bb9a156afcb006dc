use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JsonltError;
use crate::{Record, Result};

use super::value::{Key, KeyScalar};

/// Which record field(s) carry the key: a single field name, or an ordered
/// tuple of two or more distinct names.
///
/// Fixed at table creation in the header line; immutable thereafter. The
/// untagged serde shape matches the header wire format: a plain string for
/// a single key, an array of strings for a compound key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySpec {
    Single(String),
    Compound(Vec<String>),
}

impl KeySpec {
    pub fn single(name: impl Into<String>) -> Self {
        KeySpec::Single(name.into())
    }

    pub fn compound<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeySpec::Compound(names.into_iter().map(Into::into).collect())
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> &[String] {
        match self {
            KeySpec::Single(name) => std::slice::from_ref(name),
            KeySpec::Compound(names) => names,
        }
    }

    /// Check the specifier itself is well formed.
    pub fn validate(&self) -> Result<()> {
        if let KeySpec::Compound(names) = self
            && names.len() < 2
        {
            return Err(JsonltError::InvalidKey(
                "a compound key specifier needs at least two fields".to_string(),
            ));
        }
        let fields = self.field_names();
        for (i, name) in fields.iter().enumerate() {
            if name.is_empty() {
                return Err(JsonltError::InvalidKey(
                    "key field names must not be empty".to_string(),
                ));
            }
            if name.starts_with('$') {
                return Err(JsonltError::InvalidKey(format!(
                    "key field `{name}` uses a reserved name"
                )));
            }
            if fields[..i].contains(name) {
                return Err(JsonltError::InvalidKey(format!(
                    "duplicate key field `{name}`"
                )));
            }
        }
        Ok(())
    }

    /// Extract the canonical key from a record.
    pub fn extract(&self, record: &Record) -> Result<Key> {
        match self {
            KeySpec::Single(name) => Ok(Key::Single(self.component(record, name)?)),
            KeySpec::Compound(names) => {
                let mut parts = Vec::with_capacity(names.len());
                for name in names {
                    parts.push(self.component(record, name)?);
                }
                Ok(Key::Compound(parts))
            }
        }
    }

    fn component(&self, record: &Record, name: &str) -> Result<KeyScalar> {
        let value = record.get(name).ok_or_else(|| {
            JsonltError::InvalidKey(format!("record is missing key field `{name}`"))
        })?;
        KeyScalar::from_value(value)
    }

    /// Check a looked-up key has the right shape for this specifier.
    pub fn check_shape(&self, key: &Key) -> Result<()> {
        let ok = match (self, key) {
            (KeySpec::Single(_), Key::Single(_)) => true,
            (KeySpec::Compound(names), Key::Compound(parts)) => names.len() == parts.len(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(JsonltError::InvalidKey(format!(
                "key {key} does not match specifier {self}"
            )))
        }
    }

    /// The key fields of `key` as they appear on a persisted line.
    pub fn key_fields(&self, key: &Key) -> Result<Record> {
        self.check_shape(key)?;
        let mut fields = Record::new();
        match (self, key) {
            (KeySpec::Single(name), Key::Single(scalar)) => {
                fields.insert(name.clone(), scalar.to_value());
            }
            (KeySpec::Compound(names), Key::Compound(parts)) => {
                for (name, scalar) in names.iter().zip(parts) {
                    fields.insert(name.clone(), scalar.to_value());
                }
            }
            // Shapes were checked above.
            _ => {}
        }
        Ok(fields)
    }

    /// The header representation: a string or an array of strings.
    pub fn header_value(&self) -> Value {
        match self {
            KeySpec::Single(name) => Value::String(name.clone()),
            KeySpec::Compound(names) => {
                Value::Array(names.iter().map(|n| Value::String(n.clone())).collect())
            }
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Single(name) => write!(f, "{name}"),
            KeySpec::Compound(names) => write!(f, "({})", names.join(", ")),
        }
    }
}
