/// Merge: rewrite the live records of sealed segments into a scratch
/// directory, and adopt that output on the next open.
///
/// ```text
/// merge()                                  next open()
///   rotate active (new id = boundary)        <dir>-merge/merge-finished?
///   for each sealed segment < boundary         no  → discard scratch dir
///     live record? → scratch engine            yes → rename merged segments in
///                    + hint-index entry              delete the rest < boundary
///   write merge-finished(boundary)                   move hint, marker last
/// ```
///
/// The live engine keeps serving reads and writes while the merge runs; it
/// only takes the write lock to rotate and to snapshot the sealed set.
use config::{IndexType, Options};
use record::{encode, key_with_seq, parse_key_with_seq, LogRecord, RecordKind, NON_TXN_SEQ};
use segment::{segment_file_name, Segment, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::recovery::{read_hint, segment_ids};
use crate::{parse_decimal, Engine, EngineError, Result, LOCK_FILE_NAME};

/// Key of the record stored in the `merge-finished` file.
pub(crate) const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Clears the merging flag however the merge ends.
struct MergeGuard<'a>(&'a AtomicBool);

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Scratch directory used by a merge of `dir`: the sibling `<dir>-merge`.
pub(crate) fn merge_dir_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{name}-merge"))
}

impl Engine {
    /// Compacts every sealed segment into a fresh set of segments holding only
    /// live records, plus a hint file. The output replaces the old segments
    /// the next time the store is opened.
    ///
    /// # Errors
    ///
    /// [`EngineError::MergeInProgress`] if another merge is running.
    pub fn merge(&self) -> Result<()> {
        if self
            .merging
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::MergeInProgress);
        }
        let _guard = MergeGuard(&self.merging);

        let (boundary, candidates) = {
            let mut state = self.state.write();
            if state.active.is_none() {
                return Ok(());
            }
            let boundary = self.rotate(&mut state)?.id();
            let candidates: Vec<Arc<Segment>> =
                state.older.range(..boundary).map(|(_, s)| Arc::clone(s)).collect();
            (boundary, candidates)
        };

        let merge_dir = merge_dir_path(&self.options.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let scratch = Engine::open(Options {
            dir_path: merge_dir.clone(),
            max_segment_size: self.options.max_segment_size,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
        })?;
        let mut hint = Segment::open_hint(&merge_dir)?;

        let mut kept = 0usize;
        {
            let mut scratch_state = scratch.state.write();
            for segment in &candidates {
                let mut offset = 0u64;
                while let Some((record, size)) = segment.read_record(offset)? {
                    if record.kind == RecordKind::Normal {
                        let (key, _) = parse_key_with_seq(&record.key).map_err(|source| {
                            EngineError::CorruptRecord {
                                segment_id: segment.id(),
                                offset,
                                source,
                            }
                        })?;
                        let live = self.index.get(key)?.is_some_and(|pos| {
                            pos.segment_id == segment.id() && pos.offset == offset
                        });
                        if live {
                            let rewritten =
                                LogRecord::normal(key_with_seq(key, NON_TXN_SEQ), record.value);
                            let pos = scratch.append_record(&mut scratch_state, &rewritten)?;
                            hint.write_hint_record(key, &pos)?;
                            kept += 1;
                        }
                    }
                    offset += size;
                }
            }
        }

        hint.sync()?;
        scratch.sync()?;
        let mut marker = Segment::open_merge_finished(&merge_dir)?;
        let record = LogRecord::normal(
            MERGE_FINISHED_KEY.to_vec(),
            boundary.to_string().into_bytes(),
        );
        marker.write(&encode(&record).0)?;
        marker.sync()?;
        scratch.close()?;

        info!(
            boundary,
            merged_segments = candidates.len(),
            live_records = kept,
            "merge finished; output adopted on next open"
        );
        Ok(())
    }
}

/// Reads the boundary id stored in `dir/merge-finished`, if present.
pub(crate) fn read_merge_boundary(dir: &Path) -> Result<Option<u32>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        return Ok(None);
    }
    let marker = Segment::open_merge_finished(dir)?;
    let invalid = || EngineError::InvalidMarker(MERGE_FINISHED_FILE_NAME.to_string());
    let (record, _) = marker.read_record(0)?.ok_or_else(invalid)?;
    parse_decimal(&record.value).map(Some).ok_or_else(invalid)
}

/// Moves a finished merge's output from `<dir>-merge` into `dir`, replacing
/// the segments it covers. An unfinished merge is thrown away.
///
/// Merged segments are numbered from zero, so they replace old segments by
/// rename. Old segments above the merged range and below the boundary are
/// then deleted. The merged range is taken from the hint file, which only
/// moves after the segments, so a crash at any step leaves enough behind to
/// finish adoption on the next open.
pub(crate) fn adopt_merge_output(dir: &Path) -> Result<()> {
    let merge_dir = merge_dir_path(dir);
    if !merge_dir.is_dir() {
        return Ok(());
    }

    let Some(boundary) = read_merge_boundary(&merge_dir)? else {
        warn!(dir = %merge_dir.display(), "discarding unfinished merge output");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    };

    let hint_dir = if merge_dir.join(HINT_FILE_NAME).exists() {
        merge_dir.as_path()
    } else {
        dir
    };
    let merged_end = read_hint(hint_dir)?
        .iter()
        .map(|(_, pos)| pos.segment_id + 1)
        .max()
        .unwrap_or(0);

    let merged = segment_ids(&merge_dir)?;
    for &id in &merged {
        fs::rename(segment_file_name(&merge_dir, id), segment_file_name(dir, id))?;
    }
    for id in segment_ids(dir)? {
        if id >= merged_end && id < boundary {
            fs::remove_file(segment_file_name(dir, id))?;
        }
    }

    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == LOCK_FILE_NAME || name == MERGE_FINISHED_FILE_NAME {
            continue;
        }
        fs::rename(entry.path(), dir.join(&name))?;
    }
    // once the marker is in place the merge is fully adopted
    fs::rename(
        merge_dir.join(MERGE_FINISHED_FILE_NAME),
        dir.join(MERGE_FINISHED_FILE_NAME),
    )?;
    fs::remove_dir_all(&merge_dir)?;

    debug!(boundary, merged = merged.len(), "adopted merge output");
    Ok(())
}
