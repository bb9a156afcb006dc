use serde_json::Value;

use crate::error::JsonltError;
use crate::key::KeySpec;
use crate::{Record, Result};

use super::HEADER_FIELD;
use super::codec::{ParseProfile, encode_line};

/// The only format version this crate reads or writes.
pub const FORMAT_VERSION: u64 = 1;

/// Validate a decoded first-line object and return the declared key
/// specifier.
///
/// Strict rejects unknown fields inside `$jsonlt` and any sibling
/// top-level field; Lenient ignores both. Errors cite line 1.
pub fn read_header(object: &Record, profile: ParseProfile) -> Result<KeySpec> {
    let body = object
        .get(HEADER_FIELD)
        .ok_or_else(|| header_err("first line is not a `$jsonlt` header"))?;
    let Value::Object(body) = body else {
        return Err(header_err("`$jsonlt` must be an object"));
    };

    if profile == ParseProfile::Strict {
        if let Some(extra) = object.keys().find(|k| *k != HEADER_FIELD) {
            return Err(header_err(format!(
                "unexpected field `{extra}` beside the header"
            )));
        }
        if let Some(extra) = body.keys().find(|k| *k != "key" && *k != "version") {
            return Err(header_err(format!("unknown header field `{extra}`")));
        }
    }

    match body.get("version") {
        Some(Value::Number(n)) if n.as_u64() == Some(FORMAT_VERSION) => {}
        Some(other) => {
            return Err(header_err(format!("unsupported format version {other}")));
        }
        None => return Err(header_err("header is missing `version`")),
    }

    let key = body
        .get("key")
        .ok_or_else(|| header_err("header is missing `key`"))?;
    let spec: KeySpec = serde_json::from_value(key.clone())
        .map_err(|_| header_err(format!("invalid key specifier {key}")))?;
    spec.validate()
        .map_err(|e| header_err(e.to_string()))?;
    Ok(spec)
}

/// The canonical header object for a key specifier.
pub fn write_header(spec: &KeySpec) -> Record {
    let mut body = Record::new();
    body.insert("key".to_string(), spec.header_value());
    body.insert("version".to_string(), Value::from(FORMAT_VERSION));
    let mut object = Record::new();
    object.insert(HEADER_FIELD.to_string(), Value::Object(body));
    object
}

/// The encoded header line, newline included.
pub fn header_line(spec: &KeySpec) -> Result<String> {
    encode_line(&write_header(spec))
}

fn header_err(message: impl Into<String>) -> JsonltError {
    JsonltError::Parse {
        line: 1,
        message: message.into(),
    }
}
