use std::fs::File;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Compact file-identity fingerprint used to detect external mutation.
///
/// `(size, mtime)` come from file metadata and catch other processes
/// appending or rewriting. `generation` is a per-table counter bumped on
/// every local write, so a same-second rewrite that happens to preserve the
/// size is still caught when this process is the writer. Not bulletproof;
/// when in doubt, rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCursor {
    pub size: u64,
    pub mtime: SystemTime,
    pub generation: u64,
}

impl FileCursor {
    pub fn capture(file: &File, generation: u64) -> io::Result<Self> {
        let meta = file.metadata()?;
        Ok(Self {
            size: meta.len(),
            mtime: meta.modified()?,
            generation,
        })
    }

    pub fn capture_path(path: &Path, generation: u64) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            mtime: meta.modified()?,
            generation,
        })
    }

    /// True when `current` no longer matches this fingerprint.
    pub fn is_stale(&self, current: &FileCursor) -> bool {
        self.size != current.size
            || self.mtime != current.mtime
            || self.generation != current.generation
    }
}
