/// Read path: `get()`, `list_keys()`, and `fold()`.
///
/// A point read is one index lookup plus one positioned read of the segment
/// the position names. Traversals walk an index cursor in key order.
use record::{RecordKind, RecordPosition};

use crate::{Engine, EngineError, Result, State};

impl Engine {
    /// Returns the current value of `key`.
    ///
    /// # Errors
    ///
    /// [`EngineError::KeyNotFound`] if the key is absent or deleted, and
    /// [`EngineError::CorruptRecord`] if the record fails its checksum.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let state = self.state.read();
        let pos = self.index.get(key)?.ok_or(EngineError::KeyNotFound)?;
        value_at(&state, &pos)
    }

    /// Returns every live key in ascending order.
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut cursor = self.index.cursor(false)?;
        let mut keys = Vec::with_capacity(self.index.size()?);
        while let Some(key) = cursor.key() {
            keys.push(key.to_vec());
            cursor.next()?;
        }
        cursor.close();
        Ok(keys)
    }

    /// Calls `f` with each live key and value in ascending key order until it
    /// returns `false`.
    ///
    /// The read lock is held for the whole traversal, so `f` must not write
    /// to the engine.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let state = self.state.read();
        let mut cursor = self.index.cursor(false)?;
        while let (Some(key), Some(pos)) = (cursor.key(), cursor.value()) {
            let value = value_at(&state, &pos)?;
            if !f(key, &value) {
                break;
            }
            cursor.next()?;
        }
        cursor.close();
        Ok(())
    }
}

/// Value of the record at `pos`. A tombstone reads as a missing key.
pub(crate) fn value_at(state: &State, pos: &RecordPosition) -> Result<Vec<u8>> {
    let record = state.read_at(pos)?;
    match record.kind {
        RecordKind::Deleted => Err(EngineError::KeyNotFound),
        _ => Ok(record.value),
    }
}
