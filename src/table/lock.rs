use std::fs::File;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::Result;
use crate::error::JsonltError;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Guard over a whole-file advisory lock, released on drop.
///
/// # Concurrency Strategy
/// The lock is cooperative: it coordinates processes that also take it, and
/// nothing else. Multiple shared holders coexist; an exclusive holder
/// excludes everyone. All file I/O goes through the locked handle so the
/// bytes read or written are the ones the lock covers.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Acquire a shared lock, blocking, or polling until `deadline` expires.
    pub fn shared(file: File, deadline: Option<Duration>) -> Result<Self> {
        Self::acquire(file, LockMode::Shared, deadline)
    }

    /// Acquire an exclusive lock, blocking, or polling until `deadline`
    /// expires.
    pub fn exclusive(file: File, deadline: Option<Duration>) -> Result<Self> {
        Self::acquire(file, LockMode::Exclusive, deadline)
    }

    fn acquire(file: File, mode: LockMode, deadline: Option<Duration>) -> Result<Self> {
        let Some(limit) = deadline else {
            match mode {
                LockMode::Shared => FileExt::lock_shared(&file)?,
                LockMode::Exclusive => FileExt::lock_exclusive(&file)?,
            }
            return Ok(Self { file });
        };

        let started = Instant::now();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= limit {
                        return Err(JsonltError::LockTimeout(limit));
                    }
                    std::thread::sleep(RETRY_INTERVAL.min(limit));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Best effort; the OS releases the lock with the descriptor anyway.
        let _ = FileExt::unlock(&self.file);
    }
}
