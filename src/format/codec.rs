use serde::de::{self, DeserializeSeed, MapAccess, Visitor};
use serde_json::Value;

use crate::error::JsonltError;
use crate::key::value::json_type;
use crate::{Record, Result};

/// Parser strictness toward duplicate keys and unknown reserved fields.
///
/// Output is always strict; the profile only governs what a reader accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseProfile {
    /// Reject duplicate keys within a line and unknown `$`-prefixed names.
    #[default]
    Strict,
    /// Accept and ignore unknown reserved fields; the last duplicate wins.
    Lenient,
}

/// Encode one object as a canonical line: UTF-8, object keys sorted, no
/// insignificant whitespace, terminated by `\n`.
///
/// Sorting comes for free: `serde_json`'s map type is backed by a BTreeMap,
/// and any control character inside a string value is escaped, so the
/// emitted line can never contain a literal newline.
pub fn encode_line(record: &Record) -> Result<String> {
    let mut line = serde_json::to_string(record)
        .map_err(|e| JsonltError::InvalidRecord(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode one line into a JSON object.
///
/// The bytes must be UTF-8, contain no newline, and hold exactly one JSON
/// object. Errors here carry no position; callers attach the line number.
pub fn decode_line(bytes: &[u8], profile: ParseProfile) -> Result<Record> {
    let text = std::str::from_utf8(bytes).map_err(|_| parse_err("line is not valid UTF-8"))?;
    if text.contains('\n') {
        return Err(parse_err("line contains an embedded newline"));
    }
    match profile {
        ParseProfile::Strict => {
            let mut de = serde_json::Deserializer::from_str(text);
            let record = DedupObject
                .deserialize(&mut de)
                .map_err(|e| parse_err(e.to_string()))?;
            de.end()
                .map_err(|_| parse_err("trailing data after the JSON object"))?;
            Ok(record)
        }
        ParseProfile::Lenient => {
            let value: Value =
                serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?;
            match value {
                Value::Object(record) => Ok(record),
                other => Err(parse_err(format!(
                    "expected a JSON object, found {}",
                    json_type(&other)
                ))),
            }
        }
    }
}

fn parse_err(message: impl Into<String>) -> JsonltError {
    JsonltError::Parse {
        line: 0,
        message: message.into(),
    }
}

/// Map visitor that fails on duplicate keys instead of silently keeping the
/// last occurrence.
struct DedupObject;

impl<'de> DeserializeSeed<'de> for DedupObject {
    type Value = Record;

    fn deserialize<D>(self, deserializer: D) -> std::result::Result<Self::Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DedupObject {
    type Value = Record;

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut record = Record::new();
        while let Some((name, value)) = access.next_entry::<String, Value>()? {
            if record.insert(name.clone(), value).is_some() {
                return Err(de::Error::custom(format!(
                    "duplicate key `{name}` within one line"
                )));
            }
        }
        Ok(record)
    }
}
