mod cursor;
pub(crate) mod index;
mod lock;

pub use cursor::FileCursor;
pub(crate) use index::{Index, IndexEntry};
pub(crate) use lock::FileLock;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::JsonltError;
use crate::format::{self, ParseProfile};
use crate::key::{Key, KeySpec};
use crate::txn::Transaction;
use crate::{Record, Result};

/// Construction-time tunables. No environment variables are consulted.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Deadline for lock acquisition; `None` blocks indefinitely.
    pub lock_timeout: Option<Duration>,
    /// Maximum encoded line length in bytes, checked before writing.
    pub max_line_bytes: Option<usize>,
    /// Maximum file size in bytes, checked before writing.
    pub max_file_bytes: Option<u64>,
    /// Parser strictness for files read from disk. Output is always strict.
    pub profile: ParseProfile,
}

#[derive(Debug)]
pub(crate) struct TableState {
    pub(crate) index: Index,
    /// Forces a rebuild on the next access regardless of the cursor.
    pub(crate) dirty: bool,
    /// Monotonic local-write counter feeding the cursor.
    pub(crate) generation: u64,
    /// One open transaction at a time per table instance.
    pub(crate) txn_active: bool,
}

/// An append-only keyed table over one line-delimited JSON file.
///
/// Line 1 is the header declaring the key specifier; every later line is a
/// record or a tombstone, and the latest line wins per key. A `Table` is
/// safe to share across threads; one internal mutex serializes its
/// operations, while cooperation with other processes goes exclusively
/// through whole-file advisory locks taken around every read-or-write
/// boundary.
///
/// Reads serve from a cached materialized index. Before each read the
/// current `(size, mtime)` is compared against the cached cursor and the
/// index is rebuilt under a shared lock when either changed, so appends by
/// other processes become visible without explicit reloads.
#[derive(Debug)]
pub struct Table {
    path: PathBuf,
    spec: KeySpec,
    options: TableOptions,
    state: Mutex<TableState>,
}

impl Table {
    /// Open an existing table, or create a new one.
    ///
    /// With an existing non-empty file the header is validated: a supplied
    /// specifier must match it, `None` adopts it. A missing or empty file
    /// needs a specifier and is initialized with a fresh header under an
    /// exclusive lock.
    pub fn open(
        path: impl Into<PathBuf>,
        spec: Option<KeySpec>,
        options: TableOptions,
    ) -> Result<Table> {
        let path = path.into();
        if let Some(spec) = &spec {
            spec.validate()?;
        }

        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let (spec, index) = if size > 0 {
            build_index(&path, spec.as_ref(), &options, 0)?
        } else {
            let Some(spec) = spec else {
                return Err(JsonltError::Parse {
                    line: 1,
                    message: "file is empty; a key specifier is needed to initialize it"
                        .to_string(),
                });
            };
            let index = create_table_file(&path, &spec, &options)?;
            (spec, index)
        };

        Ok(Table {
            path,
            spec,
            options,
            state: Mutex::new(TableState {
                index,
                dirty: false,
                generation: 0,
                txn_active: false,
            }),
        })
    }

    /// Atomically create a new table file with an initial batch of records.
    ///
    /// The header and the records, in canonical key order, are written to a
    /// sibling temp file, fsync'd, and renamed into place. Fails with
    /// [`JsonltError::FileExists`] when the path already holds content and
    /// with [`JsonltError::InvalidKey`] on duplicate keys in the batch.
    pub fn from_records(
        path: impl Into<PathBuf>,
        records: Vec<Record>,
        spec: KeySpec,
        options: TableOptions,
    ) -> Result<Table> {
        spec.validate()?;
        let path = path.into();

        let existing = match fs::metadata(&path) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if existing.is_some_and(|size| size > 0) {
            return Err(JsonltError::FileExists(path));
        }

        let mut by_key: BTreeMap<Key, Record> = BTreeMap::new();
        for record in records {
            validate_record(&record)?;
            let key = spec.extract(&record)?;
            if by_key.insert(key.clone(), record).is_some() {
                return Err(JsonltError::InvalidKey(format!(
                    "duplicate key {key} in the initial batch"
                )));
            }
        }

        let mut contents = format::header_line(&spec)?;
        let mut entries = BTreeMap::new();
        for (key, record) in by_key {
            let line = format::encode_line(&record)?;
            check_line_limit(&options, line.len())?;
            let offset = contents.len() as u64;
            contents.push_str(&line);
            entries.insert(key, IndexEntry { record, offset });
        }
        check_file_limit(&options, contents.len() as u64)?;

        let mut tmp = NamedTempFile::new_in(parent_dir(&path))?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        // Same inode survives the rename, so this fingerprint stays valid.
        let cursor = FileCursor::capture(tmp.as_file(), 0)?;

        let persisted = if existing.is_none() {
            tmp.persist_noclobber(&path)
        } else {
            tmp.persist(&path)
        };
        match persisted {
            Ok(_) => {}
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(JsonltError::FileExists(path));
            }
            Err(e) => return Err(e.error.into()),
        }

        let lines = 1 + entries.len();
        info!(path = %path.display(), records = entries.len(), "created table from records");
        Ok(Table {
            path,
            spec,
            options,
            state: Mutex::new(TableState {
                index: Index {
                    entries,
                    cursor,
                    lines,
                },
                dirty: false,
                generation: 0,
                txn_active: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_spec(&self) -> &KeySpec {
        &self.spec
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    /// Current record for `key`, or `None`.
    pub fn get(&self, key: impl Into<Key>) -> Result<Option<Record>> {
        let key = key.into();
        self.spec.check_shape(&key)?;
        let mut state = self.state();
        let index = self.refreshed(&mut state)?;
        Ok(index.entries.get(&key).map(|e| e.record.clone()))
    }

    pub fn has(&self, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        self.spec.check_shape(&key)?;
        let mut state = self.state();
        let index = self.refreshed(&mut state)?;
        Ok(index.entries.contains_key(&key))
    }

    /// Insert or update one record: both are a single appended line.
    ///
    /// # Concurrency Strategy
    /// The exclusive lock is held only for the append itself. The index is
    /// refreshed under the same lock first, so appends from other processes
    /// that slipped in are folded before ours lands.
    pub fn put(&self, record: Record) -> Result<()> {
        validate_record(&record)?;
        let key = self.spec.extract(&record)?;
        let line = format::encode_line(&record)?;
        check_line_limit(&self.options, line.len())?;

        let mut state = self.state();
        let mut lock = self.lock_exclusive()?;
        self.refresh_locked(&mut state, lock.file())?;

        debug!(%key, "appending record");
        self.append_line(&mut state, &mut lock, key, Some(record), &line)
    }

    /// Append a tombstone for `key`. Deleting an absent key fails with
    /// [`JsonltError::MissingKey`].
    pub fn delete(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        let fields = self.spec.key_fields(&key)?;
        let line = format::encode_line(&tombstone_object(fields))?;
        check_line_limit(&self.options, line.len())?;

        let mut state = self.state();
        let mut lock = self.lock_exclusive()?;
        self.refresh_locked(&mut state, lock.file())?;

        if !state.index.entries.contains_key(&key) {
            return Err(JsonltError::MissingKey(key));
        }

        debug!(%key, "appending tombstone");
        self.append_line(&mut state, &mut lock, key, None, &line)
    }

    /// All live records in canonical key order. A snapshot, never a live
    /// view.
    pub fn all(&self) -> Result<Vec<Record>> {
        let mut state = self.state();
        let index = self.refreshed(&mut state)?;
        Ok(index.entries.values().map(|e| e.record.clone()).collect())
    }

    /// All live keys in canonical order.
    pub fn keys(&self) -> Result<Vec<Key>> {
        let mut state = self.state();
        let index = self.refreshed(&mut state)?;
        Ok(index.entries.keys().cloned().collect())
    }

    /// `(key, record)` pairs in canonical key order.
    pub fn items(&self) -> Result<Vec<(Key, Record)>> {
        let mut state = self.state();
        let index = self.refreshed(&mut state)?;
        Ok(index
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.record.clone()))
            .collect())
    }

    pub fn count(&self) -> Result<usize> {
        let mut state = self.state();
        let index = self.refreshed(&mut state)?;
        Ok(index.entries.len())
    }

    /// Linear scan of the materialized view, stopping after `limit` hits
    /// when one is given.
    pub fn find<P>(&self, mut predicate: P, limit: Option<usize>) -> Result<Vec<Record>>
    where
        P: FnMut(&Record) -> bool,
    {
        let mut state = self.state();
        let index = self.refreshed(&mut state)?;
        let mut found = Vec::new();
        for entry in index.entries.values() {
            if limit.is_some_and(|n| found.len() >= n) {
                break;
            }
            if predicate(&entry.record) {
                found.push(entry.record.clone());
            }
        }
        Ok(found)
    }

    pub fn find_one<P>(&self, predicate: P) -> Result<Option<Record>>
    where
        P: FnMut(&Record) -> bool,
    {
        Ok(self.find(predicate, Some(1))?.pop())
    }

    /// Rewrite the file as header plus live records in canonical order.
    ///
    /// Superseded lines and tombstones vanish. The new contents go to a
    /// sibling temp file, get fsync'd, and replace the original by atomic
    /// rename, all under the exclusive lock. Readers still holding the old
    /// descriptor keep a consistent pre-compaction snapshot.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state();
        self.rewrite(&mut state, false)
    }

    /// Compaction with zero records: just the header survives.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state();
        self.rewrite(&mut state, true)
    }

    /// Drop the cached index; the next access rebuilds from disk.
    pub fn reload(&self) {
        self.state().dirty = true;
    }

    /// Start a snapshot-isolated transaction.
    ///
    /// Only one transaction may be open per table instance; a second
    /// attempt fails with [`JsonltError::TransactionState`]. The
    /// transaction holds no file lock until commit.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        let mut state = self.state();
        if state.txn_active {
            return Err(JsonltError::TransactionState(
                "a transaction is already open on this table".to_string(),
            ));
        }
        let index = self.refreshed(&mut state)?;
        let snapshot: BTreeMap<Key, Record> = index
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.record.clone()))
            .collect();
        let cursor = index.cursor;
        let lines = index.lines;
        state.txn_active = true;
        Ok(Transaction::new(self, snapshot, cursor, lines))
    }

    /// Remove and return the record for `key`; `None` when absent.
    ///
    /// The read and the tombstone append happen under one exclusive lock,
    /// so the returned record is exactly the one the tombstone removed.
    pub fn pop(&self, key: impl Into<Key>) -> Result<Option<Record>> {
        let key = key.into();
        let fields = self.spec.key_fields(&key)?;
        let line = format::encode_line(&tombstone_object(fields))?;
        check_line_limit(&self.options, line.len())?;

        let mut state = self.state();
        let mut lock = self.lock_exclusive()?;
        self.refresh_locked(&mut state, lock.file())?;

        let Some(entry) = state.index.entries.get(&key) else {
            return Ok(None);
        };
        let record = entry.record.clone();
        debug!(%key, "appending tombstone");
        self.append_line(&mut state, &mut lock, key, None, &line)?;
        Ok(Some(record))
    }

    /// Insert `record` only when its key is absent; returns the stored
    /// record either way.
    ///
    /// The check and the insert happen under one exclusive lock, so of two
    /// racing callers exactly one inserts and both see its record.
    pub fn get_or_insert(&self, record: Record) -> Result<Record> {
        validate_record(&record)?;
        let key = self.spec.extract(&record)?;
        let line = format::encode_line(&record)?;
        check_line_limit(&self.options, line.len())?;

        let mut state = self.state();
        let mut lock = self.lock_exclusive()?;
        self.refresh_locked(&mut state, lock.file())?;

        if let Some(entry) = state.index.entries.get(&key) {
            return Ok(entry.record.clone());
        }
        debug!(%key, "appending record");
        self.append_line(&mut state, &mut lock, key, Some(record.clone()), &line)?;
        Ok(record)
    }

    /// Put every record in order; the last write wins per key.
    pub fn extend(&self, records: impl IntoIterator<Item = Record>) -> Result<()> {
        for record in records {
            self.put(record)?;
        }
        Ok(())
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_exclusive(&self) -> Result<FileLock> {
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        FileLock::exclusive(file, self.options.lock_timeout)
    }

    pub(crate) fn release_txn(&self) {
        self.state().txn_active = false;
    }

    /// Rebuild the cached index from an already-locked handle when the
    /// cursor says the file moved underneath us.
    pub(crate) fn refresh_locked(&self, state: &mut TableState, file: &File) -> Result<()> {
        let current = FileCursor::capture(file, state.generation)?;
        if state.dirty || state.index.cursor.is_stale(&current) {
            debug!(path = %self.path.display(), "cursor changed, rebuilding index");
            let (_, index) =
                replay_from(file, Some(&self.spec), self.options.profile, state.generation)?;
            state.index = index;
            state.dirty = false;
        }
        Ok(())
    }

    /// Append one already-encoded line under the held exclusive lock and
    /// fold it into the cached index. `record` is `None` for a tombstone.
    fn append_line(
        &self,
        state: &mut TableState,
        lock: &mut FileLock,
        key: Key,
        record: Option<Record>,
        line: &str,
    ) -> Result<()> {
        let offset = state.index.cursor.size;
        check_file_limit(&self.options, offset + line.len() as u64)?;
        lock.file_mut().write_all(line.as_bytes())?;
        lock.file().sync_all()?;

        state.generation += 1;
        match record {
            Some(record) => {
                state.index.entries.insert(key, IndexEntry { record, offset });
            }
            None => {
                state.index.entries.remove(&key);
            }
        }
        state.index.lines += 1;
        state.index.cursor = FileCursor::capture(lock.file(), state.generation)?;
        Ok(())
    }

    /// Cached index, rebuilt under a shared lock when the cursor changed.
    fn refreshed<'a>(&self, state: &'a mut TableState) -> Result<&'a mut Index> {
        let rebuild = state.dirty || {
            let current = FileCursor::capture_path(&self.path, state.generation)?;
            state.index.cursor.is_stale(&current)
        };
        if rebuild {
            debug!(path = %self.path.display(), "cursor changed, rebuilding index");
            let (_, index) = build_index(&self.path, Some(&self.spec), &self.options, state.generation)?;
            state.index = index;
            state.dirty = false;
        }
        Ok(&mut state.index)
    }

    fn rewrite(&self, state: &mut TableState, drop_records: bool) -> Result<()> {
        let lock = self.lock_exclusive()?;
        self.refresh_locked(state, lock.file())?;

        let mut contents = format::header_line(&self.spec)?;
        let mut entries = BTreeMap::new();
        if !drop_records {
            for (key, entry) in &state.index.entries {
                let line = format::encode_line(&entry.record)?;
                check_line_limit(&self.options, line.len())?;
                let offset = contents.len() as u64;
                contents.push_str(&line);
                entries.insert(
                    key.clone(),
                    IndexEntry {
                        record: entry.record.clone(),
                        offset,
                    },
                );
            }
        }
        check_file_limit(&self.options, contents.len() as u64)?;

        let mut tmp = NamedTempFile::new_in(parent_dir(&self.path))?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        // Same inode survives the rename, so this fingerprint stays valid.
        state.generation += 1;
        let cursor = FileCursor::capture(tmp.as_file(), state.generation)?;
        tmp.persist(&self.path).map_err(|e| JsonltError::Io(e.error))?;

        let lines = 1 + entries.len();
        info!(path = %self.path.display(), live = entries.len(), "compacted table");
        state.index = Index {
            entries,
            cursor,
            lines,
        };
        state.dirty = false;
        drop(lock);
        Ok(())
    }
}

/// Reject reserved `$`-prefixed top-level fields on the write path.
pub(crate) fn validate_record(record: &Record) -> Result<()> {
    if let Some(name) = record.keys().find(|k| k.starts_with('$')) {
        return Err(JsonltError::InvalidRecord(format!(
            "reserved field `{name}` is not allowed in a record"
        )));
    }
    Ok(())
}

/// Key fields plus the `$deleted` marker.
pub(crate) fn tombstone_object(mut key_fields: Record) -> Record {
    key_fields.insert(format::DELETED_FIELD.to_string(), Value::Bool(true));
    key_fields
}

fn check_line_limit(options: &TableOptions, len: usize) -> Result<()> {
    if let Some(max) = options.max_line_bytes
        && len > max
    {
        return Err(JsonltError::LineTooLong { size: len, max });
    }
    Ok(())
}

fn check_file_limit(options: &TableOptions, size: u64) -> Result<()> {
    if let Some(max) = options.max_file_bytes
        && size > max
    {
        return Err(JsonltError::FileTooLarge { size, max });
    }
    Ok(())
}

impl Table {
    pub(crate) fn check_line_limit(&self, len: usize) -> Result<()> {
        check_line_limit(&self.options, len)
    }

    pub(crate) fn check_file_limit(&self, size: u64) -> Result<()> {
        check_file_limit(&self.options, size)
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Read and replay the file under a shared lock.
fn build_index(
    path: &Path,
    expected: Option<&KeySpec>,
    options: &TableOptions,
    generation: u64,
) -> Result<(KeySpec, Index)> {
    let file = File::open(path)?;
    let lock = FileLock::shared(file, options.lock_timeout)?;
    replay_from(lock.file(), expected, options.profile, generation)
}

/// Replay through an already-locked handle.
fn replay_from(
    file: &File,
    expected: Option<&KeySpec>,
    profile: ParseProfile,
    generation: u64,
) -> Result<(KeySpec, Index)> {
    let cursor = FileCursor::capture(file, generation)?;
    let mut reader = file;
    reader.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::with_capacity(cursor.size as usize);
    reader.read_to_end(&mut buf)?;
    Index::replay(&buf, expected, profile, cursor)
}

/// Initialize a fresh table file with just a header, under an exclusive
/// lock. Loses the race gracefully when another process got there first.
fn create_table_file(path: &Path, spec: &KeySpec, options: &TableOptions) -> Result<Index> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    let mut lock = FileLock::exclusive(file, options.lock_timeout)?;

    if lock.file().metadata()?.len() > 0 {
        drop(lock);
        return build_index(path, Some(spec), options, 0).map(|(_, index)| index);
    }

    let line = format::header_line(spec)?;
    lock.file_mut().write_all(line.as_bytes())?;
    lock.file().sync_all()?;
    let cursor = FileCursor::capture(lock.file(), 0)?;
    info!(path = %path.display(), "created table");
    Ok(Index {
        entries: BTreeMap::new(),
        cursor,
        lines: 1,
    })
}
