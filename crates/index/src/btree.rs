use parking_lot::RwLock;
use record::RecordPosition;
use std::collections::BTreeMap;

use crate::{IndexCursor, IndexError, Indexer, SnapshotCursor};

/// Sorted in-memory index backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPosition>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: RecordPosition) -> Result<Option<RecordPosition>, IndexError> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPosition>, IndexError> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<(Option<RecordPosition>, bool), IndexError> {
        let old = self.tree.write().remove(key);
        let found = old.is_some();
        Ok((old, found))
    }

    fn size(&self) -> Result<usize, IndexError> {
        Ok(self.tree.read().len())
    }

    fn cursor(&self, reverse: bool) -> Result<Box<dyn IndexCursor>, IndexError> {
        let items = self
            .tree
            .read()
            .iter()
            .map(|(k, pos)| (k.clone(), *pos))
            .collect();
        Ok(Box::new(SnapshotCursor::new(items, reverse)))
    }

    fn close(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
