use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::JsonltError;
use crate::format::{self, ParseProfile, decode_line, read_header};
use crate::key::{Key, KeySpec};
use crate::{Record, Result};

use super::cursor::FileCursor;

/// One live line in the materialized view.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Latest record for the key.
    pub record: Record,
    /// Byte offset of the producing line within the file.
    pub offset: u64,
}

/// Ordered materialized view of a table file, built by replaying it once.
///
/// Deleted keys are absent. Iterating `entries` yields canonical key order.
#[derive(Debug, Clone)]
pub struct Index {
    pub entries: BTreeMap<Key, IndexEntry>,
    /// Fingerprint of the file state this index was built from.
    pub cursor: FileCursor,
    /// Total line count, header included.
    pub lines: usize,
}

impl Index {
    /// Replay a whole file buffer into an index.
    ///
    /// `expected` pins the key specifier; `None` adopts the header's. The
    /// fold is deterministic: each record line sets its key, each tombstone
    /// removes it, latest line wins. Any failure cites the 1-based line
    /// number and leaves nothing half-built behind.
    pub fn replay(
        buf: &[u8],
        expected: Option<&KeySpec>,
        profile: ParseProfile,
        cursor: FileCursor,
    ) -> Result<(KeySpec, Index)> {
        let lines = split_lines(buf, 1)?;
        let Some(((_, header_bytes), records)) = lines.split_first() else {
            return Err(JsonltError::Parse {
                line: 1,
                message: "file has no header line".to_string(),
            });
        };

        let header = decode_line(header_bytes, profile).map_err(|e| e.at_line(1))?;
        let spec = read_header(&header, profile)?;
        if let Some(expected) = expected
            && *expected != spec
        {
            return Err(JsonltError::KeySpecMismatch {
                expected: expected.clone(),
                found: spec,
            });
        }

        let mut entries = BTreeMap::new();
        for (i, (offset, bytes)) in records.iter().enumerate() {
            let lineno = i + 2;
            match parse_record_line(bytes, &spec, profile).map_err(|e| e.at_line(lineno))? {
                LineKind::Record { key, record } => {
                    entries.insert(
                        key,
                        IndexEntry {
                            record,
                            offset: *offset,
                        },
                    );
                }
                LineKind::Tombstone { key } => {
                    entries.remove(&key);
                }
            }
        }

        debug!(lines = lines.len(), live = entries.len(), "replayed table file");
        Ok((
            spec,
            Index {
                entries,
                cursor,
                lines: lines.len(),
            },
        ))
    }
}

/// What one non-header line contributes to the materialized view.
enum LineKind {
    Record { key: Key, record: Record },
    Tombstone { key: Key },
}

/// Parse the lines appended after a snapshot and report the keys they
/// mutate, in file order. `first_line` is the 1-based number of the first
/// appended line.
pub fn scan_appended(
    buf: &[u8],
    spec: &KeySpec,
    profile: ParseProfile,
    first_line: usize,
) -> Result<Vec<Key>> {
    let lines = split_lines(buf, first_line)?;
    let mut keys = Vec::with_capacity(lines.len());
    for (i, (_, bytes)) in lines.iter().enumerate() {
        let kind = parse_record_line(bytes, spec, profile).map_err(|e| e.at_line(first_line + i))?;
        keys.push(match kind {
            LineKind::Record { key, .. } | LineKind::Tombstone { key } => key,
        });
    }
    Ok(keys)
}

/// Split a buffer into `(offset, line)` pairs, enforcing the no-blank-line
/// and trailing-newline invariants. `first_line` numbers the errors.
fn split_lines(buf: &[u8], first_line: usize) -> Result<Vec<(u64, &[u8])>> {
    let mut lines = Vec::new();
    let mut start = 0usize;
    for (pos, byte) in buf.iter().enumerate() {
        if *byte == b'\n' {
            let line = &buf[start..pos];
            if line.is_empty() {
                return Err(JsonltError::Parse {
                    line: first_line + lines.len(),
                    message: "blank line".to_string(),
                });
            }
            lines.push((start as u64, line));
            start = pos + 1;
        }
    }
    if start < buf.len() {
        return Err(JsonltError::Parse {
            line: first_line + lines.len(),
            message: "final line is not newline-terminated (truncated write?)".to_string(),
        });
    }
    Ok(lines)
}

fn parse_record_line(bytes: &[u8], spec: &KeySpec, profile: ParseProfile) -> Result<LineKind> {
    let mut object = decode_line(bytes, profile)?;

    if object.contains_key(format::HEADER_FIELD) {
        return Err(line_err("`$jsonlt` header outside line 1"));
    }

    let deleted = match object.get(format::DELETED_FIELD) {
        None => false,
        Some(Value::Bool(true)) => true,
        Some(other) => match profile {
            ParseProfile::Strict => {
                return Err(line_err(format!("`$deleted` must be true, found {other}")));
            }
            ParseProfile::Lenient => false,
        },
    };

    let unknown: Vec<String> = object
        .keys()
        .filter(|k| k.starts_with('$') && *k != format::DELETED_FIELD)
        .cloned()
        .collect();
    if !unknown.is_empty() {
        match profile {
            ParseProfile::Strict => {
                return Err(line_err(format!("unknown reserved field `{}`", unknown[0])));
            }
            ParseProfile::Lenient => {
                for name in unknown {
                    object.remove(&name);
                }
            }
        }
    }

    let key = spec
        .extract(&object)
        .map_err(|e| line_err(e.to_string()))?;

    if deleted {
        Ok(LineKind::Tombstone { key })
    } else {
        object.remove(format::DELETED_FIELD);
        Ok(LineKind::Record { key, record: object })
    }
}

fn line_err(message: impl Into<String>) -> JsonltError {
    JsonltError::Parse {
        line: 0,
        message: message.into(),
    }
}
