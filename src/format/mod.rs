pub mod codec;
pub mod header;

// Re-export commonly used items
pub use codec::{ParseProfile, decode_line, encode_line};
pub use header::{FORMAT_VERSION, header_line, read_header, write_header};

/// Reserved top-level field carrying the header descriptor (line 1 only).
pub const HEADER_FIELD: &str = "$jsonlt";

/// Reserved top-level field marking a tombstone line.
pub const DELETED_FIELD: &str = "$deleted";
