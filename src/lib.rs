//! Append-only, keyed-record tables over line-delimited JSON.
//!
//! One JSON object per line: a `$jsonlt` header on line 1 declaring the key
//! specifier, then records and tombstones. Later lines supersede earlier
//! lines with the same key, so version-control diffs show only what was
//! appended while readers materialize the current state by replaying the
//! file. Concurrent processes coordinate through cooperative whole-file
//! locks; [`Transaction`] adds snapshot isolation with optimistic write
//! conflict detection on top.

pub mod error;
pub mod format;
pub mod key;
pub mod logger;
pub mod table;
pub mod txn;

// Re-export commonly used types
pub use error::{JsonltError, Result};
pub use format::ParseProfile;
pub use key::{Key, KeyScalar, KeySpec};
pub use table::{Table, TableOptions};
pub use txn::Transaction;

/// A stored record: one dynamic JSON object, emitted with sorted keys.
pub type Record = serde_json::Map<String, serde_json::Value>;
