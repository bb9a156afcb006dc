use std::fmt;

use serde_json::Value;

use crate::Result;
use crate::error::JsonltError;

/// One component of a key: a JSON string or a JSON integer.
///
/// The variant order is the canonical type rank: integers sort before
/// strings. Within a variant, integers compare numerically and strings by
/// Unicode code point (UTF-8 byte order), so the derived `Ord` is the
/// canonical key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyScalar {
    Int(i64),
    Str(String),
}

impl KeyScalar {
    /// Validate a JSON value as a key component.
    ///
    /// Null, booleans, floats with fractional parts, integers outside the
    /// i64 range, arrays, and objects are all invalid.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(KeyScalar::Str(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Ok(KeyScalar::Int(i));
                }
                // An integral float like 1.0 is still an integer key; only a
                // genuine fractional part or an out-of-range value is invalid.
                if n.is_f64()
                    && let Some(f) = n.as_f64()
                    && f.fract() == 0.0
                    && f >= i64::MIN as f64
                    && f < i64::MAX as f64
                {
                    return Ok(KeyScalar::Int(f as i64));
                }
                Err(JsonltError::InvalidKey(format!(
                    "number {n} is not a plain integer"
                )))
            }
            other => Err(JsonltError::InvalidKey(format!(
                "{} is not a valid key component",
                json_type(other)
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            KeyScalar::Int(n) => Value::from(*n),
            KeyScalar::Str(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for KeyScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyScalar::Int(n) => write!(f, "{n}"),
            KeyScalar::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// A canonical key value: one scalar, or an ordered tuple of scalars for
/// compound key specifiers. Integer keys and numeric-string keys are
/// distinct (`1` is not `"1"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Single(KeyScalar),
    Compound(Vec<KeyScalar>),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Single(scalar) => write!(f, "{scalar}"),
            Key::Compound(parts) => {
                write!(f, "(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{part}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Human-readable name of a JSON value's type, for error messages.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl From<&str> for KeyScalar {
    fn from(s: &str) -> Self {
        KeyScalar::Str(s.to_string())
    }
}

impl From<String> for KeyScalar {
    fn from(s: String) -> Self {
        KeyScalar::Str(s)
    }
}

impl From<i64> for KeyScalar {
    fn from(n: i64) -> Self {
        KeyScalar::Int(n)
    }
}

impl From<i32> for KeyScalar {
    fn from(n: i32) -> Self {
        KeyScalar::Int(i64::from(n))
    }
}

impl From<KeyScalar> for Key {
    fn from(scalar: KeyScalar) -> Self {
        Key::Single(scalar)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Single(KeyScalar::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Single(KeyScalar::from(s))
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Single(KeyScalar::from(n))
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Single(KeyScalar::from(n))
    }
}

impl<A: Into<KeyScalar>, B: Into<KeyScalar>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Key::Compound(vec![a.into(), b.into()])
    }
}

impl<A: Into<KeyScalar>, B: Into<KeyScalar>, C: Into<KeyScalar>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Self {
        Key::Compound(vec![a.into(), b.into(), c.into()])
    }
}

impl From<Vec<KeyScalar>> for Key {
    fn from(parts: Vec<KeyScalar>) -> Self {
        Key::Compound(parts)
    }
}
