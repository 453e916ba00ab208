/// Atomic write batches.
///
/// Writes are buffered locally and land on disk together at commit, each key
/// framed with the batch's sequence number and followed by a `txn-fin` marker
/// for that number. Replay applies a batch only when its marker is present,
/// so a crash mid-commit leaves none of it visible.
use config::WriteBatchOptions;
use record::{key_with_seq, LogRecord, RecordKind, RecordPosition};
use std::collections::BTreeMap;

use crate::write::validate_entry;
use crate::{Engine, EngineError, Result};

/// A set of puts and deletes committed atomically.
///
/// Created by [`Engine::new_write_batch`]. Later writes to the same key
/// replace earlier ones inside the batch.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: BTreeMap<Vec<u8>, (RecordKind, Vec<u8>)>,
}

impl Engine {
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            engine: self,
            options,
            pending: BTreeMap::new(),
        }
    }
}

impl WriteBatch<'_> {
    /// Buffers a put of `key`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_entry(key, value)?;
        self.pending
            .insert(key.to_vec(), (RecordKind::Normal, value.to_vec()));
        Ok(())
    }

    /// Buffers a delete of `key`.
    ///
    /// A delete after a buffered put drops the put. It is only buffered as a
    /// tombstone if the key was not buffered, or if it is also live in the
    /// store and the tombstone is needed to remove it there.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let was_buffered = self.pending.remove(key).is_some();
        if !was_buffered || self.engine.index.get(key)?.is_some() {
            self.pending
                .insert(key.to_vec(), (RecordKind::Deleted, Vec::new()));
        }
        Ok(())
    }

    /// Number of buffered writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Writes every buffered record plus the commit marker, then updates the
    /// index. Committing an empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// [`EngineError::ExceedMaxBatchSize`] if more writes are buffered than
    /// `max_batch_size`. On an I/O error the batch stays buffered and none of
    /// it becomes visible.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.pending.len() > self.options.max_batch_size {
            return Err(EngineError::ExceedMaxBatchSize {
                pending: self.pending.len(),
                max: self.options.max_batch_size,
            });
        }

        let engine = self.engine;
        let mut state = engine.state.write();
        // consumed even if the commit fails, so a later batch never shares a
        // number with a partial one left on disk
        state.seq_no += 1;
        let seq = state.seq_no;

        let mut written: Vec<(&[u8], RecordKind, RecordPosition)> =
            Vec::with_capacity(self.pending.len());
        for (key, (kind, value)) in &self.pending {
            let record = LogRecord {
                key: key_with_seq(key, seq),
                value: value.clone(),
                kind: *kind,
            };
            let pos = engine.append_record(&mut state, &record)?;
            written.push((key.as_slice(), *kind, pos));
        }
        let marker = engine.append_record(&mut state, &LogRecord::txn_finished(seq))?;
        state.reclaimable += u64::from(marker.size);

        if self.options.sync_writes {
            if let Some(active) = &state.active {
                active.sync()?;
            }
        }

        for (key, kind, pos) in written {
            let old = if kind == RecordKind::Deleted {
                state.reclaimable += u64::from(pos.size);
                engine.index.delete(key)?.0
            } else {
                engine.index.put(key.to_vec(), pos)?
            };
            if let Some(old) = old {
                state.reclaimable += u64::from(old.size);
            }
        }

        self.pending.clear();
        Ok(())
    }
}

impl std::fmt::Debug for WriteBatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("options", &self.options)
            .field("pending", &self.pending.len())
            .finish()
    }
}
