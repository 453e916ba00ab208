//! # Engine - CaskKV Storage Engine
//!
//! A log-structured hash-table store in the bitcask style. Every mutation is
//! appended to the active segment file; an index maps each live key to the
//! position of its latest record so a read costs one index lookup and one
//! positioned read.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌──────────────────────────────────────────────────┐
//! │                     ENGINE                       │
//! │                                                  │
//! │ write.rs → encode → append to active segment     │
//! │              |        (rotate when full)         │
//! │              v                                   │
//! │           index.put(key, position)               │
//! │                                                  │
//! │ read.rs  → index.get(key) → segment.read_record  │
//! │                                                  │
//! │ batch.rs → records tagged with seq N             │
//! │            + txn-fin(N) marker, one write lock   │
//! │                                                  │
//! │ merge.rs → rewrite live records of sealed        │
//! │            segments into <dir>-merge + hint file │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                               |
//! |----------------|-------------------------------------------------------|
//! | [`lib.rs`]     | `Engine` struct, `open`, `close`, accessors, `Drop`   |
//! | [`recovery`]   | Segment discovery, hint loading, log replay           |
//! | [`write`]      | `put()`, `delete()`, `sync()`, segment rotation       |
//! | [`read`]       | `get()`, `list_keys()`, `fold()`                      |
//! | [`batch`]      | `WriteBatch` with atomic, sequence-tagged commit      |
//! | [`merge`]      | `merge()` and adoption of finished merge output       |
//! | [`iterator`]   | Prefix-filtered, ordered key/value iterator           |
//! | [`stat`]       | Key count, segment count, reclaimable and disk bytes  |
//!
//! ## Directory Layout
//!
//! ```text
//! <dir>/
//!   0000000000.data    sealed segment
//!   0000000001.data    active segment (highest id)
//!   hint-index         key → position table written by merge
//!   merge-finished     boundary segment id of the last merge
//!   bptree-index       B+Tree index file (bptree backend only)
//!   seq-no             last sequence number (bptree backend, after close)
//!   flock              exclusive process lock
//! <dir>-merge/         scratch directory of an in-flight merge
//! ```
//!
//! ## Crash Safety
//!
//! A batch becomes visible only once its `txn-fin` marker is on disk;
//! replay discards records whose marker never arrived. Merge output is only
//! adopted on the next open, and only if its `merge-finished` marker exists.
//! A torn record at the tail of the active segment is truncated away during
//! recovery.
mod batch;
mod error;
mod iterator;
mod merge;
mod read;
mod recovery;
mod stat;
mod write;

pub use batch::WriteBatch;
pub use config::{IndexType, IteratorOptions, Options, WriteBatchOptions};
pub use error::{EngineError, Result};
pub use iterator::DbIterator;
pub use stat::Stat;

use fs2::FileExt;
use index::Indexer;
use parking_lot::RwLock;
use record::{encode, LogRecord, RecordError, RecordPosition};
use segment::Segment;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (64 MiB).
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// Name of the lock file guarding the data directory.
pub const LOCK_FILE_NAME: &str = "flock";

/// Key of the record stored in the `seq-no` file.
pub(crate) const SEQ_NO_KEY: &[u8] = b"seq.no";

/// A bitcask-style key-value store over a directory of segment files.
///
/// All methods take `&self`; the engine can be shared between threads behind
/// an `Arc`. Appends, rotation and index updates happen under one write lock
/// so the order of records on disk matches the order of index updates.
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) state: RwLock<State>,
    pub(crate) index: Box<dyn Indexer>,
    /// Set while a merge runs; a second merge fails fast.
    pub(crate) merging: AtomicBool,
    /// Holds the exclusive `flock`; released when the file is dropped.
    lock_file: File,
    closed: bool,
}

/// Segment set and counters guarded by the engine lock.
pub(crate) struct State {
    /// Segment receiving appends. `None` until the first write.
    pub(crate) active: Option<Segment>,
    /// Sealed segments by id. Shared so a merge can read them unlocked.
    pub(crate) older: BTreeMap<u32, Arc<Segment>>,
    /// Last sequence number handed to a committed batch.
    pub(crate) seq_no: u64,
    /// Bytes held by records that a merge would drop.
    pub(crate) reclaimable: u64,
    /// Bytes appended since the last sync.
    pub(crate) bytes_since_sync: u64,
}

impl State {
    pub(crate) fn segment(&self, id: u32) -> Option<&Segment> {
        match &self.active {
            Some(active) if active.id() == id => Some(active),
            _ => self.older.get(&id).map(Arc::as_ref),
        }
    }

    /// Reads the record an index position points at.
    pub(crate) fn read_at(&self, pos: &RecordPosition) -> Result<LogRecord> {
        let segment = self
            .segment(pos.segment_id)
            .ok_or(EngineError::SegmentNotFound(pos.segment_id))?;
        match segment.read_record(pos.offset)? {
            Some((record, _)) => Ok(record),
            None => Err(EngineError::CorruptRecord {
                segment_id: pos.segment_id,
                offset: pos.offset,
                source: RecordError::Truncated {
                    needed: pos.size as usize,
                    available: 0,
                },
            }),
        }
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.older.len() + usize::from(self.active.is_some())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Engine")
            .field("dir_path", &self.options.dir_path)
            .field("index_type", &self.options.index_type)
            .field("sync_writes", &self.options.sync_writes)
            .field("active_segment", &state.active.as_ref().map(Segment::id))
            .field("sealed_segments", &state.older.len())
            .field("seq_no", &state.seq_no)
            .field("reclaimable", &state.reclaimable)
            .finish()
    }
}

impl Engine {
    /// Opens (or creates) the store in `options.dir_path`.
    ///
    /// # Recovery Steps
    ///
    /// 1. Validate the options and create the directory.
    /// 2. Take the exclusive directory lock.
    /// 3. Adopt the output of a finished merge, or discard an unfinished one.
    /// 4. Open every segment and rebuild the index (see [`recovery`]).
    ///
    /// # Errors
    ///
    /// [`EngineError::DatabaseInUse`] if another engine holds the directory,
    /// [`EngineError::InvalidOptions`] for bad options, and any I/O or
    /// corruption error hit during recovery.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        let dir = options.dir_path.clone();
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE_NAME))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(EngineError::DatabaseInUse);
        }

        merge::adopt_merge_output(&dir)?;

        let index = index::new_indexer(options.index_type, &dir, options.sync_writes)?;
        let state = recovery::recover(&options, index.as_ref())?;

        info!(
            dir = %dir.display(),
            index = %options.index_type,
            segments = state.segment_count(),
            seq_no = state.seq_no,
            "engine opened"
        );

        Ok(Self {
            options,
            state: RwLock::new(state),
            index,
            merging: AtomicBool::new(false),
            lock_file,
            closed: false,
        })
    }

    /// Syncs and releases the store.
    ///
    /// Dropping the engine does the same on a best-effort basis; `close`
    /// reports the errors.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.index.close()?;
        let state = self.state.read();
        if self.options.index_type == IndexType::BPlusTree {
            // the B+Tree is not rebuilt from the log, so the counter is
            // persisted separately
            let mut seq_file = Segment::open_seq_no(&self.options.dir_path)?;
            let record =
                LogRecord::normal(SEQ_NO_KEY.to_vec(), state.seq_no.to_string().into_bytes());
            seq_file.write(&encode(&record).0)?;
            seq_file.sync()?;
        }
        if let Some(active) = &state.active {
            active.sync()?;
        }
        info!(dir = %self.options.dir_path.display(), "engine closed");
        Ok(())
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }

    #[must_use]
    pub fn dir_path(&self) -> &Path {
        &self.options.dir_path
    }

    /// Returns the last committed batch sequence number.
    #[must_use]
    pub fn seq_no(&self) -> u64 {
        self.state.read().seq_no
    }

    /// Returns the id of the active segment, if any write has happened.
    #[must_use]
    pub fn active_segment_id(&self) -> Option<u32> {
        self.state.read().active.as_ref().map(Segment::id)
    }

    /// Returns the number of segment files, active one included.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.read().segment_count()
    }
}

/// Best-effort close on drop.
impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "failed to close engine cleanly");
        }
        let _ = FileExt::unlock(&self.lock_file);
    }
}

/// Drops `path` if it exists.
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Parses a decimal counter stored as a record value.
pub(crate) fn parse_decimal<T: std::str::FromStr>(value: &[u8]) -> Option<T> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

#[cfg(test)]
mod tests;
