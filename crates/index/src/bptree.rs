/// Disk-backed index stored in a redb B+Tree.
///
/// Values are positions encoded with [`record::encode_position`]. Unlike the
/// in-memory backends this index survives a restart, so the engine skips log
/// replay when it is selected.
use record::{decode_position, encode_position, RecordPosition};
use redb::{
    AccessGuard, Database, Durability, ReadOnlyTable, ReadableTable, ReadableTableMetadata,
    StorageError, TableDefinition, WriteTransaction,
};
use std::fmt;
use std::ops::Bound;
use std::path::Path;

use crate::{IndexCursor, IndexError, Indexer};

/// File name of the B+Tree inside the data directory.
pub const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("bp-index");

fn storage<E: Into<redb::Error>>(e: E) -> IndexError {
    IndexError::Storage(e.into())
}

/// Index persisted in `<dir>/bptree-index`.
pub struct BPlusTreeIndex {
    db: Database,
    sync_writes: bool,
}

impl fmt::Debug for BPlusTreeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BPlusTreeIndex")
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl BPlusTreeIndex {
    /// Opens or creates the index file in `dir`.
    ///
    /// With `sync_writes` off, commits skip fsync and become durable at the
    /// next durable commit (at the latest on [`Indexer::close`]).
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self, IndexError> {
        let db = Database::create(dir.join(BPTREE_INDEX_FILE_NAME)).map_err(storage)?;

        // make sure the table exists before any read transaction opens it
        let txn = db.begin_write().map_err(storage)?;
        txn.open_table(TABLE).map_err(storage)?;
        txn.commit().map_err(storage)?;

        Ok(Self { db, sync_writes })
    }

    fn begin_write(&self) -> Result<WriteTransaction, IndexError> {
        let mut txn = self.db.begin_write().map_err(storage)?;
        if !self.sync_writes {
            txn.set_durability(Durability::None);
        }
        Ok(txn)
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>, IndexError> {
        let encoded = encode_position(&pos);
        let txn = self.begin_write()?;
        let old = {
            let mut table = txn.open_table(TABLE).map_err(storage)?;
            let previous = table
                .insert(key.as_slice(), encoded.as_slice())
                .map_err(storage)?;
            previous.map(|v| decode_position(v.value())).transpose()?
        };
        txn.commit().map_err(storage)?;
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>, IndexError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(TABLE).map_err(storage)?;
        let found = table.get(key).map_err(storage)?;
        Ok(found.map(|v| decode_position(v.value())).transpose()?)
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<RecordPosition>, bool), IndexError> {
        let txn = self.begin_write()?;
        let old = {
            let mut table = txn.open_table(TABLE).map_err(storage)?;
            let removed = table.remove(key).map_err(storage)?;
            removed.map(|v| decode_position(v.value())).transpose()?
        };
        txn.commit().map_err(storage)?;
        let found = old.is_some();
        Ok((old, found))
    }

    fn size(&self) -> Result<usize, IndexError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(TABLE).map_err(storage)?;
        Ok(table.len().map_err(storage)? as usize)
    }

    fn cursor(&self, reverse: bool) -> Result<Box<dyn IndexCursor>, IndexError> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(TABLE).map_err(storage)?;
        let mut cursor = BPlusTreeCursor {
            table: Some(table),
            reverse,
            current: None,
        };
        cursor.rewind()?;
        Ok(Box::new(cursor))
    }

    fn close(&self) -> Result<(), IndexError> {
        // an empty durable commit flushes every relaxed commit before it
        let txn = self.db.begin_write().map_err(storage)?;
        txn.commit().map_err(storage)?;
        Ok(())
    }
}

type Entry<'a> = Result<(AccessGuard<'a, &'static [u8]>, AccessGuard<'a, &'static [u8]>), StorageError>;

fn decode_entry(entry: Entry<'_>) -> Result<(Vec<u8>, RecordPosition), IndexError> {
    let (key, value) = entry.map_err(storage)?;
    Ok((key.value().to_vec(), decode_position(value.value())?))
}

/// Lazy cursor: holds a read snapshot and runs one range query per step.
struct BPlusTreeCursor {
    table: Option<ReadOnlyTable<&'static [u8], &'static [u8]>>,
    reverse: bool,
    current: Option<(Vec<u8>, RecordPosition)>,
}

impl BPlusTreeCursor {
    /// Loads the first entry of `range` in iteration order.
    fn load(&mut self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> Result<(), IndexError> {
        let Some(table) = &self.table else {
            self.current = None;
            return Ok(());
        };
        let mut range = table.range::<&[u8]>((lower, upper)).map_err(storage)?;
        let entry = if self.reverse {
            range.next_back()
        } else {
            range.next()
        };
        let loaded = entry.map(decode_entry).transpose()?;
        self.current = loaded;
        Ok(())
    }
}

impl IndexCursor for BPlusTreeCursor {
    fn rewind(&mut self) -> Result<(), IndexError> {
        self.load(Bound::Unbounded, Bound::Unbounded)
    }

    fn seek(&mut self, key: &[u8]) -> Result<(), IndexError> {
        if self.reverse {
            self.load(Bound::Unbounded, Bound::Included(key))
        } else {
            self.load(Bound::Included(key), Bound::Unbounded)
        }
    }

    fn next(&mut self) -> Result<(), IndexError> {
        let Some((current, _)) = self.current.take() else {
            return Ok(());
        };
        if self.reverse {
            self.load(Bound::Unbounded, Bound::Excluded(current.as_slice()))
        } else {
            self.load(Bound::Excluded(current.as_slice()), Bound::Unbounded)
        }
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    fn value(&self) -> Option<RecordPosition> {
        self.current.as_ref().map(|(_, pos)| *pos)
    }

    fn close(&mut self) {
        self.table = None;
        self.current = None;
    }
}
