//! # Config - CaskKV Options
//!
//! Plain option structures consumed by the storage engine. Loading these from
//! the environment is left to front ends (see the `cli` crate); this crate only
//! defines the shapes, their defaults, and validation.
//!
//! ```text
//! Options            dir_path | max_segment_size | sync_writes
//!                    bytes_per_sync | index_type | mmap_at_startup
//! IteratorOptions    prefix | reverse
//! WriteBatchOptions  max_batch_size | sync_writes
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Default maximum size of a single segment file (256 MiB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;

/// Default maximum number of pending writes in one batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 10_000;

/// Errors returned by [`Options::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `dir_path` is empty.
    #[error("database directory path is empty")]
    EmptyDirPath,

    /// `max_segment_size` is zero.
    #[error("max segment size must be greater than zero")]
    InvalidSegmentSize,

    /// An index type name could not be parsed.
    #[error("unknown index type '{0}' (expected btree, art or bptree)")]
    UnknownIndexType(String),
}

/// Which index backend maps keys to log positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// Sorted in-memory tree, rebuilt from the log on every open.
    #[default]
    BTree,
    /// Adaptive radix tree, rebuilt from the log on every open.
    Art,
    /// Disk-backed B+Tree that survives restarts without log replay.
    BPlusTree,
}

impl FromStr for IndexType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "btree" => Ok(IndexType::BTree),
            "art" => Ok(IndexType::Art),
            "bptree" | "bplustree" => Ok(IndexType::BPlusTree),
            other => Err(ConfigError::UnknownIndexType(other.to_string())),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexType::BTree => "btree",
            IndexType::Art => "art",
            IndexType::BPlusTree => "bptree",
        };
        f.write_str(name)
    }
}

/// Engine options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Data directory. Created on open if it does not exist.
    pub dir_path: PathBuf,

    /// A segment is sealed and a new one started once an append would push
    /// its size past this many bytes.
    pub max_segment_size: u64,

    /// If `true`, every append is followed by `fsync`.
    pub sync_writes: bool,

    /// When `sync_writes` is off, sync after this many bytes have been
    /// appended since the last sync. `0` disables periodic syncing.
    pub bytes_per_sync: u64,

    /// Index backend.
    pub index_type: IndexType,

    /// Memory-map segments while replaying them at startup.
    pub mmap_at_startup: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./data"),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: true,
        }
    }
}

impl Options {
    /// Default options rooted at `dir_path`.
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            ..Self::default()
        }
    }

    /// Sets the maximum segment size in bytes.
    #[must_use]
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets whether every write is synced.
    #[must_use]
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Sets the periodic sync threshold in bytes.
    #[must_use]
    pub fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Selects the index backend.
    #[must_use]
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Enables or disables memory-mapped reads during startup.
    #[must_use]
    pub fn mmap_at_startup(mut self, mmap: bool) -> Self {
        self.mmap_at_startup = mmap;
        self
    }

    /// Checks the options for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyDirPath`] or
    /// [`ConfigError::InvalidSegmentSize`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDirPath);
        }
        if self.max_segment_size == 0 {
            return Err(ConfigError::InvalidSegmentSize);
        }
        Ok(())
    }
}

/// Options for the engine's key iterator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IteratorOptions {
    /// Only keys starting with this prefix are visited. Empty means all keys.
    pub prefix: Vec<u8>,
    /// Visit keys in descending order.
    pub reverse: bool,
}

impl IteratorOptions {
    /// Iterate keys that start with `prefix`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            reverse: false,
        }
    }

    /// Flip the iteration order.
    #[must_use]
    pub fn reversed(mut self) -> Self {
        self.reverse = !self.reverse;
        self
    }
}

/// Options for atomic write batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatchOptions {
    /// Maximum number of pending writes a single commit accepts.
    pub max_batch_size: usize,
    /// Sync the active segment once the commit marker is written.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            sync_writes: true,
        }
    }
}
