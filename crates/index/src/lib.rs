//! # Index - Key to Log Position Maps
//!
//! The engine never scans segments on the read path: every live key maps to
//! the [`RecordPosition`] of its latest record through an [`Indexer`].
//!
//! ## Backends
//!
//! | Backend            | Storage            | Survives restart | Cursor       |
//! |--------------------|--------------------|------------------|--------------|
//! | [`BTreeIndex`]     | `BTreeMap`         | no (log replay)  | snapshot     |
//! | [`ArtIndex`]       | adaptive radix tree| no (log replay)  | snapshot     |
//! | [`BPlusTreeIndex`] | `redb` file        | yes              | lazy, ranged |
//!
//! All backends order keys byte-wise, so cursors over the same contents visit
//! keys in the same order regardless of backend.
//!
//! ## Concurrency
//!
//! Every method takes `&self`. The in-memory backends guard their tree with a
//! `parking_lot::RwLock`; the B+Tree backend relies on redb transactions.

mod art;
mod bptree;
mod btree;

pub use art::ArtIndex;
pub use bptree::{BPlusTreeIndex, BPTREE_INDEX_FILE_NAME};
pub use btree::BTreeIndex;

use config::IndexType;
use record::{RecordError, RecordPosition};
use std::path::Path;
use thiserror::Error;

/// Errors produced by index backends.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The on-disk B+Tree failed.
    #[error("index storage error: {0}")]
    Storage(#[from] redb::Error),

    /// A stored position could not be decoded.
    #[error("corrupt index entry: {0}")]
    Corrupt(#[from] RecordError),
}

/// Maps keys to the position of their latest record.
pub trait Indexer: Send + Sync {
    /// Inserts or replaces `key`, returning the displaced position.
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>, IndexError>;

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>, IndexError>;

    /// Removes `key`. Returns the removed position and whether the key was
    /// present.
    fn delete(&self, key: &[u8]) -> Result<(Option<RecordPosition>, bool), IndexError>;

    /// Number of keys.
    fn size(&self) -> Result<usize, IndexError>;

    /// A cursor positioned at the first key (last key if `reverse`).
    fn cursor(&self, reverse: bool) -> Result<Box<dyn IndexCursor>, IndexError>;

    /// Flushes and releases backend resources.
    fn close(&self) -> Result<(), IndexError>;
}

/// Ordered traversal over a point-in-time view of an index.
pub trait IndexCursor {
    /// Moves back to the first key in iteration order.
    fn rewind(&mut self) -> Result<(), IndexError>;

    /// Moves to the first key `>= key`, or `<= key` for a reverse cursor.
    fn seek(&mut self, key: &[u8]) -> Result<(), IndexError>;

    /// Advances by one key.
    fn next(&mut self) -> Result<(), IndexError>;

    /// `true` while the cursor points at a key.
    fn valid(&self) -> bool;

    fn key(&self) -> Option<&[u8]>;

    fn value(&self) -> Option<RecordPosition>;

    /// Releases the snapshot. The cursor is exhausted afterwards.
    fn close(&mut self);
}

/// Builds the backend selected by `index_type`.
///
/// `dir` and `sync_writes` only matter for [`IndexType::BPlusTree`].
pub fn new_indexer(
    index_type: IndexType,
    dir: &Path,
    sync_writes: bool,
) -> Result<Box<dyn Indexer>, IndexError> {
    Ok(match index_type {
        IndexType::BTree => Box::new(BTreeIndex::new()),
        IndexType::Art => Box::new(ArtIndex::new()),
        IndexType::BPlusTree => Box::new(BPlusTreeIndex::open(dir, sync_writes)?),
    })
}

/// Cursor over an owned, sorted copy of the index.
///
/// Used by the in-memory backends: taking the copy is the only time the tree
/// lock is held.
pub(crate) struct SnapshotCursor {
    /// Entries in iteration order (descending when `reverse`).
    items: Vec<(Vec<u8>, RecordPosition)>,
    at: usize,
    reverse: bool,
}

impl SnapshotCursor {
    /// `items` must be sorted ascending by key.
    pub(crate) fn new(mut items: Vec<(Vec<u8>, RecordPosition)>, reverse: bool) -> Self {
        if reverse {
            items.reverse();
        }
        Self {
            items,
            at: 0,
            reverse,
        }
    }
}

impl IndexCursor for SnapshotCursor {
    fn rewind(&mut self) -> Result<(), IndexError> {
        self.at = 0;
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<(), IndexError> {
        self.at = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
        Ok(())
    }

    fn next(&mut self) -> Result<(), IndexError> {
        if self.at < self.items.len() {
            self.at += 1;
        }
        Ok(())
    }

    fn valid(&self) -> bool {
        self.at < self.items.len()
    }

    fn key(&self) -> Option<&[u8]> {
        self.items.get(self.at).map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<RecordPosition> {
        self.items.get(self.at).map(|(_, pos)| *pos)
    }

    fn close(&mut self) {
        self.items.clear();
        self.at = 0;
    }
}

#[cfg(test)]
mod tests;
