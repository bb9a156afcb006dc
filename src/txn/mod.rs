use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, info, warn};

use crate::error::JsonltError;
use crate::format;
use crate::key::Key;
use crate::table::{FileCursor, IndexEntry, Table, index, tombstone_object, validate_record};
use crate::{Record, Result};

/// A staged mutation; the last write per key wins.
#[derive(Debug, Clone)]
enum WriteOp {
    Put(Record),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// A snapshot-isolated, buffered overlay on a [`Table`].
///
/// Reads see the table exactly as it was when the transaction was opened,
/// plus this transaction's own staged writes. Nothing touches the file and
/// no lock is held until [`commit`](Transaction::commit), so long-lived
/// transactions block neither readers nor other writers.
///
/// # Conflict policy
/// Commit is first-committer-wins optimistic concurrency: it fails with
/// [`JsonltError::Conflict`] when a key this transaction *wrote* was
/// mutated on disk after the snapshot. The read-set is recorded but only
/// matters for keys that were also written (they sit in the write buffer
/// anyway); keys that were merely read never abort a commit.
#[derive(Debug)]
pub struct Transaction<'t> {
    table: &'t Table,
    snapshot: BTreeMap<Key, Record>,
    snap_cursor: FileCursor,
    snap_lines: usize,
    reads: BTreeSet<Key>,
    writes: BTreeMap<Key, WriteOp>,
    state: TxnState,
}

impl<'t> Transaction<'t> {
    pub(crate) fn new(
        table: &'t Table,
        snapshot: BTreeMap<Key, Record>,
        snap_cursor: FileCursor,
        snap_lines: usize,
    ) -> Self {
        Self {
            table,
            snapshot,
            snap_cursor,
            snap_lines,
            reads: BTreeSet::new(),
            writes: BTreeMap::new(),
            state: TxnState::Active,
        }
    }

    /// Record for `key` as seen by this transaction.
    pub fn get(&mut self, key: impl Into<Key>) -> Result<Option<Record>> {
        self.ensure_active()?;
        let key = key.into();
        self.table.key_spec().check_shape(&key)?;
        self.reads.insert(key.clone());
        Ok(self.view(&key))
    }

    pub fn has(&mut self, key: impl Into<Key>) -> Result<bool> {
        self.ensure_active()?;
        let key = key.into();
        self.table.key_spec().check_shape(&key)?;
        self.reads.insert(key.clone());
        Ok(self.view(&key).is_some())
    }

    /// Stage an insert or update.
    pub fn put(&mut self, record: Record) -> Result<()> {
        self.ensure_active()?;
        validate_record(&record)?;
        let key = self.table.key_spec().extract(&record)?;
        self.writes.insert(key, WriteOp::Put(record));
        Ok(())
    }

    /// Stage a delete. Unlike [`Table::delete`], deleting a key absent from
    /// both the snapshot and the buffer is legal; the intent is kept and a
    /// tombstone is appended at commit.
    pub fn delete(&mut self, key: impl Into<Key>) -> Result<()> {
        self.ensure_active()?;
        let key = key.into();
        self.table.key_spec().check_shape(&key)?;
        self.writes.insert(key, WriteOp::Delete);
        Ok(())
    }

    /// Keys visible to this transaction, in canonical order. Registers
    /// every snapshot key as read.
    pub fn keys(&mut self) -> Result<Vec<Key>> {
        self.ensure_active()?;
        self.mark_all_read();
        Ok(self.merged().into_keys().cloned().collect())
    }

    pub fn items(&mut self) -> Result<Vec<(Key, Record)>> {
        self.ensure_active()?;
        self.mark_all_read();
        Ok(self
            .merged()
            .into_iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect())
    }

    pub fn all(&mut self) -> Result<Vec<Record>> {
        self.ensure_active()?;
        self.mark_all_read();
        Ok(self.merged().into_values().cloned().collect())
    }

    pub fn count(&mut self) -> Result<usize> {
        self.ensure_active()?;
        self.mark_all_read();
        Ok(self.merged().len())
    }

    /// Keys consulted by reads so far, in canonical order.
    pub fn read_set(&self) -> Vec<Key> {
        self.reads.iter().cloned().collect()
    }

    /// Keys with staged writes, in canonical order.
    pub fn write_set(&self) -> Vec<Key> {
        self.writes.keys().cloned().collect()
    }

    /// Flush the write buffer as one contiguous, fsync'd line group.
    ///
    /// Under the exclusive lock, every line appended since the snapshot is
    /// re-read; if any of them mutated a key in the write buffer the commit
    /// fails with [`JsonltError::Conflict`] naming that key and the
    /// transaction is aborted. A commit with an empty buffer is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        if self.writes.is_empty() {
            debug!("transaction committed with no staged writes");
            self.state = TxnState::Committed;
            self.table.release_txn();
            return Ok(());
        }

        let result = self.commit_inner();
        self.state = match result {
            Ok(()) => TxnState::Committed,
            Err(_) => TxnState::Aborted,
        };
        self.table.release_txn();
        result
    }

    /// Discard all buffered state without touching the file.
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxnState::Aborted;
        self.writes.clear();
        self.reads.clear();
        self.table.release_txn();
        Ok(())
    }

    fn commit_inner(&mut self) -> Result<()> {
        let mut state = self.table.state();
        let mut lock = self.table.lock_exclusive()?;

        for key in self.appended_keys(lock.file(), state.generation)? {
            if self.writes.contains_key(&key) {
                info!(%key, "write conflict, aborting transaction");
                return Err(JsonltError::Conflict { key });
            }
        }

        // Fold in whatever landed since the snapshot before our group does.
        self.table.refresh_locked(&mut state, lock.file())?;

        let mut group = String::new();
        let mut ops: Vec<(Key, Option<Record>, usize)> = Vec::with_capacity(self.writes.len());
        for (key, op) in &self.writes {
            let object = match op {
                WriteOp::Put(record) => record.clone(),
                WriteOp::Delete => tombstone_object(self.table.key_spec().key_fields(key)?),
            };
            let line = format::encode_line(&object)?;
            self.table.check_line_limit(line.len())?;
            let staged = match op {
                WriteOp::Put(record) => Some(record.clone()),
                WriteOp::Delete => None,
            };
            ops.push((key.clone(), staged, line.len()));
            group.push_str(&line);
        }

        let base = state.index.cursor.size;
        self.table.check_file_limit(base + group.len() as u64)?;
        lock.file_mut().write_all(group.as_bytes())?;
        lock.file().sync_all()?;

        state.generation += 1;
        let mut offset = base;
        for (key, staged, line_len) in ops {
            match staged {
                Some(record) => {
                    state.index.entries.insert(key, IndexEntry { record, offset });
                }
                None => {
                    state.index.entries.remove(&key);
                }
            }
            offset += line_len as u64;
            state.index.lines += 1;
        }
        state.index.cursor = FileCursor::capture(lock.file(), state.generation)?;

        info!(writes = self.writes.len(), "transaction committed");
        Ok(())
    }

    /// Keys mutated by lines appended after the snapshot cursor.
    fn appended_keys(&self, file: &std::fs::File, table_generation: u64) -> Result<Vec<Key>> {
        let current = FileCursor::capture(file, self.snap_cursor.generation)?;

        if current.size < self.snap_cursor.size {
            // The file was rewritten underneath us (compaction or clear);
            // the appended suffix no longer exists, so per-key detection is
            // impossible. Fail on the smallest written key rather than risk
            // a lost update.
            warn!("table file rewritten during transaction");
            if let Some(key) = self.writes.keys().next() {
                return Err(JsonltError::Conflict { key: key.clone() });
            }
            return Ok(Vec::new());
        }

        if current.size == self.snap_cursor.size {
            let rewritten = current.mtime != self.snap_cursor.mtime
                || table_generation != self.snap_cursor.generation;
            if rewritten {
                // Same-size rewrite. Equally undetectable per key.
                warn!("table file rewritten in place during transaction");
                if let Some(key) = self.writes.keys().next() {
                    return Err(JsonltError::Conflict { key: key.clone() });
                }
            }
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; (current.size - self.snap_cursor.size) as usize];
        let mut reader = file;
        reader.seek(SeekFrom::Start(self.snap_cursor.size))?;
        reader.read_exact(&mut buf)?;
        index::scan_appended(
            &buf,
            self.table.key_spec(),
            self.table.options().profile,
            self.snap_lines + 1,
        )
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(JsonltError::TransactionState(
                "transaction already committed".to_string(),
            )),
            TxnState::Aborted => Err(JsonltError::TransactionState(
                "transaction already aborted".to_string(),
            )),
        }
    }

    fn view(&self, key: &Key) -> Option<Record> {
        match self.writes.get(key) {
            Some(WriteOp::Put(record)) => Some(record.clone()),
            Some(WriteOp::Delete) => None,
            None => self.snapshot.get(key).cloned(),
        }
    }

    fn mark_all_read(&mut self) {
        let keys: Vec<Key> = self.snapshot.keys().cloned().collect();
        self.reads.extend(keys);
    }

    /// Snapshot overlaid with the write buffer.
    fn merged(&self) -> BTreeMap<&Key, &Record> {
        let mut view: BTreeMap<&Key, &Record> = self.snapshot.iter().collect();
        for (key, op) in &self.writes {
            match op {
                WriteOp::Put(record) => {
                    view.insert(key, record);
                }
                WriteOp::Delete => {
                    view.remove(key);
                }
            }
        }
        view
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            self.state = TxnState::Aborted;
            self.table.release_txn();
        }
    }
}
