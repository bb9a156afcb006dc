pub mod spec;
pub mod value;

// Re-export commonly used types
pub use spec::KeySpec;
pub use value::{Key, KeyScalar};
