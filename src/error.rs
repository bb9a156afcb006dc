use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::key::{Key, KeySpec};

#[derive(Error, Debug)]
pub enum JsonltError {
    /// Malformed file: bad header, invalid JSON, blank line, truncated
    /// write, missing key fields. Line numbers are 1-based.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not acquire file lock within {0:?}")]
    LockTimeout(Duration),

    #[error("encoded line is {size} bytes, over the {max} byte limit")]
    LineTooLong { size: usize, max: usize },

    #[error("write would grow the file to {size} bytes, over the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    #[error("transaction is not active: {0}")]
    TransactionState(String),

    /// Commit aborted: the key was mutated on disk after the snapshot.
    #[error("write conflict on key {key}")]
    Conflict { key: Key },

    #[error("key not found: {0}")]
    MissingKey(Key),

    #[error("file already has content: {}", .0.display())]
    FileExists(PathBuf),

    #[error("key specifier mismatch: file declares {found}, caller expected {expected}")]
    KeySpecMismatch { expected: KeySpec, found: KeySpec },
}

impl JsonltError {
    /// Attach a 1-based line number to a position-less parse error.
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            JsonltError::Parse { message, .. } => JsonltError::Parse { line, message },
            other => other,
        }
    }
}

/// Result type for the jsonlt crate
pub type Result<T> = std::result::Result<T, JsonltError>;
