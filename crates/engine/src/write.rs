/// Write path: `put()`, `delete()`, `sync()`, and the shared append and
/// rotation helpers used by batches and merge.
///
/// Each write encodes one record, appends it to the active segment under the
/// engine write lock, and only then updates the index. Keys written here carry
/// the non-transactional sequence number so replay applies them immediately.
use record::{encode, key_with_seq, LogRecord, RecordPosition, NON_TXN_SEQ};
use segment::{IoKind, Segment};
use std::sync::Arc;
use tracing::debug;

use crate::{Engine, EngineError, Result, State, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// Rejects keys and values the log cannot hold.
pub(crate) fn validate_entry(key: &[u8], value: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(EngineError::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(EngineError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

impl Engine {
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// The record is on disk (though not necessarily synced) before the index
    /// points at it. The replaced record's bytes become reclaimable.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_entry(key, value)?;
        let record = LogRecord::normal(key_with_seq(key, NON_TXN_SEQ), value.to_vec());

        let mut state = self.state.write();
        let pos = self.append_record(&mut state, &record)?;
        if let Some(old) = self.index.put(key.to_vec(), pos)? {
            state.reclaimable += u64::from(old.size);
        }
        Ok(())
    }

    /// Removes `key`. Deleting an absent key is a no-op and writes nothing.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let mut state = self.state.write();
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let tombstone = LogRecord::tombstone(key_with_seq(key, NON_TXN_SEQ));
        let pos = self.append_record(&mut state, &tombstone)?;
        // the tombstone itself is garbage as soon as it lands
        state.reclaimable += u64::from(pos.size);

        let (old, found) = self.index.delete(key)?;
        if !found {
            return Err(EngineError::IndexUpdateFailed);
        }
        if let Some(old) = old {
            state.reclaimable += u64::from(old.size);
        }
        Ok(())
    }

    /// Flushes the active segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.read();
        if let Some(active) = &state.active {
            active.sync()?;
        }
        Ok(())
    }

    /// Appends `record` to the active segment, rotating first if it would
    /// overflow `max_segment_size`, and applies the sync policy.
    ///
    /// The caller holds the write lock and owns the index update.
    pub(crate) fn append_record(
        &self,
        state: &mut State,
        record: &LogRecord,
    ) -> Result<RecordPosition> {
        let (buf, size) = encode(record);
        let size64 = size as u64;
        let max = self.options.max_segment_size;

        let active = match state.active.as_mut() {
            Some(active) if active.write_offset() + size64 <= max => active,
            // an empty segment takes the record even if it is oversized
            Some(active) if active.write_offset() == 0 => active,
            _ => self.rotate(state)?,
        };

        let offset = active.write_offset();
        active.write(&buf)?;
        let pos = RecordPosition {
            segment_id: active.id(),
            offset,
            size: size as u32,
        };

        state.bytes_since_sync += size64;
        let periodic = self.options.bytes_per_sync > 0
            && state.bytes_since_sync >= self.options.bytes_per_sync;
        if self.options.sync_writes || periodic {
            if let Some(active) = &state.active {
                active.sync()?;
            }
            state.bytes_since_sync = 0;
        }
        Ok(pos)
    }

    /// Seals the active segment (if any) and opens the next one.
    ///
    /// The active segment is only sealed once its sync succeeded; on error it
    /// stays active.
    pub(crate) fn rotate<'s>(&self, state: &'s mut State) -> Result<&'s mut Segment> {
        if let Some(current) = &state.active {
            current.sync()?;
        }
        let next_id = match state.active.take() {
            Some(current) => {
                let id = current.id();
                state.older.insert(id, Arc::new(current));
                id + 1
            }
            None => state.older.keys().next_back().map_or(0, |id| id + 1),
        };

        let segment = Segment::open(&self.options.dir_path, next_id, IoKind::File)?;
        debug!(segment_id = next_id, "rotated to new active segment");
        state.bytes_since_sync = 0;
        Ok(state.active.insert(segment))
    }
}
