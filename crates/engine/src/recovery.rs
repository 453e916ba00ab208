/// Cold-start path: segment discovery, hint loading, and log replay.
///
/// In-memory indexes are rebuilt from the hint file written by the last merge
/// plus a replay of every segment the merge did not cover. The B+Tree index
/// persists on its own, so only the sequence counter is restored for it and
/// the active segment is scanned for its valid end.
use config::{IndexType, Options};
use index::Indexer;
use record::{decode_position, parse_key_with_seq, RecordKind, RecordPosition, NON_TXN_SEQ};
use segment::{IoKind, Segment, HINT_FILE_NAME, SEGMENT_FILE_SUFFIX, SEQ_NO_FILE_NAME};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::merge::read_merge_boundary;
use crate::{parse_decimal, remove_if_exists, EngineError, Result, State};

/// Records of a batch that has not seen its commit marker yet.
type Pending = Vec<(Vec<u8>, RecordKind, RecordPosition)>;

/// Opens every segment in the directory and rebuilds `index`.
pub(crate) fn recover(options: &Options, index: &dyn Indexer) -> Result<State> {
    let dir = options.dir_path.as_path();
    let kind = if options.mmap_at_startup {
        IoKind::Mmap
    } else {
        IoKind::File
    };

    let mut segments = Vec::new();
    for id in segment_ids(dir)? {
        segments.push(Segment::open(dir, id, kind)?);
    }
    let boundary = read_merge_boundary(dir)?;

    let (seq_no, reclaimable, active_end) = if options.index_type == IndexType::BPlusTree {
        let seq_no = restore_seq_no(dir)?;
        if let Some(boundary) = boundary {
            repoint_from_hint(dir, index, boundary)?;
        }
        let active_end = segments.last().map(valid_end).transpose()?;
        (seq_no, 0, active_end)
    } else {
        if boundary.is_some() {
            load_hint(dir, index)?;
        }
        let replay = replay(&segments, boundary.unwrap_or(0), index)?;
        (replay.seq_no, replay.reclaimable, replay.active_end)
    };

    if kind == IoKind::Mmap {
        for segment in &mut segments {
            segment.set_io_kind(IoKind::File)?;
        }
    }

    let mut active = segments.pop();
    if let Some(active) = active.as_mut() {
        let size = active.size()?;
        match active_end {
            Some(end) if end < size => {
                warn!(
                    segment_id = active.id(),
                    valid = end,
                    size,
                    "truncating torn tail of active segment"
                );
                active.truncate_tail(end)?;
            }
            _ => active.set_write_offset(size),
        }
    }

    let older: BTreeMap<u32, Arc<Segment>> = segments
        .into_iter()
        .map(|s| (s.id(), Arc::new(s)))
        .collect();

    Ok(State {
        active,
        older,
        seq_no,
        reclaimable,
        bytes_since_sync: 0,
    })
}

/// Ids of the `.data` files in `dir`, ascending.
pub(crate) fn segment_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_FILE_SUFFIX) {
            continue;
        }
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| EngineError::DirectoryCorrupted(path.display().to_string()))?;
        ids.push(id);
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Loads every entry of the hint file into `index`.
fn load_hint(dir: &Path, index: &dyn Indexer) -> Result<()> {
    for (key, pos) in read_hint(dir)? {
        index.put(key, pos)?;
    }
    Ok(())
}

/// Points B+Tree entries that still name pre-merge segments at the merged
/// copies listed in the hint file. Keys rewritten or deleted after the merge
/// are left alone.
fn repoint_from_hint(dir: &Path, index: &dyn Indexer, boundary: u32) -> Result<()> {
    let mut repointed = 0usize;
    for (key, pos) in read_hint(dir)? {
        match index.get(&key)? {
            Some(current) if current.segment_id < boundary && current != pos => {
                index.put(key, pos)?;
                repointed += 1;
            }
            _ => {}
        }
    }
    debug!(repointed, "applied hint file to persistent index");
    Ok(())
}

/// Entries of the hint file in `dir`; empty if there is none.
pub(crate) fn read_hint(dir: &Path) -> Result<Vec<(Vec<u8>, RecordPosition)>> {
    if !dir.join(HINT_FILE_NAME).exists() {
        return Ok(Vec::new());
    }
    let hint = Segment::open_hint(dir)?;
    let mut entries = Vec::new();
    let mut offset = 0;
    while let Some((record, size)) = hint.read_record(offset)? {
        let pos = decode_position(&record.value).map_err(|source| EngineError::CorruptRecord {
            segment_id: hint.id(),
            offset,
            source,
        })?;
        entries.push((record.key, pos));
        offset += size;
    }
    Ok(entries)
}

/// End of the last complete record in `segment`. Fails if a damaged record
/// sits in front of valid ones.
fn valid_end(segment: &Segment) -> Result<u64> {
    let mut offset = 0;
    while let Some((_, size)) = segment.read_record(offset)? {
        offset += size;
    }
    segment.check_torn_tail(offset)?;
    Ok(offset)
}

/// Reads and removes the `seq-no` file left by the last close.
fn restore_seq_no(dir: &Path) -> Result<u64> {
    let path = dir.join(SEQ_NO_FILE_NAME);
    if !path.exists() {
        return Ok(NON_TXN_SEQ);
    }
    let seq_no = {
        let file = Segment::open_seq_no(dir)?;
        match file.read_record(0)? {
            Some((record, _)) => parse_decimal(&record.value)
                .ok_or_else(|| EngineError::InvalidMarker(SEQ_NO_FILE_NAME.to_string()))?,
            None => NON_TXN_SEQ,
        }
    };
    remove_if_exists(&path)?;
    Ok(seq_no)
}

struct Replay {
    seq_no: u64,
    reclaimable: u64,
    /// End of the last valid record in the newest segment.
    active_end: Option<u64>,
}

/// Applies the records of every segment with id `>= boundary` to `index`.
///
/// Non-transactional records apply at once. Batch records are held until
/// their commit marker; a batch with no marker is dropped.
fn replay(segments: &[Segment], boundary: u32, index: &dyn Indexer) -> Result<Replay> {
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut seq_no = NON_TXN_SEQ;
    let mut reclaimable = 0u64;
    let mut active_end = None;
    let mut applied = 0usize;

    for segment in segments {
        if segment.id() < boundary {
            continue;
        }
        let mut offset = 0u64;
        while let Some((record, size)) = segment.read_record(offset)? {
            let pos = RecordPosition {
                segment_id: segment.id(),
                offset,
                size: size as u32,
            };
            let (key, seq) =
                parse_key_with_seq(&record.key).map_err(|source| EngineError::CorruptRecord {
                    segment_id: segment.id(),
                    offset,
                    source,
                })?;

            if record.kind == RecordKind::TxnFinished {
                for (key, kind, pos) in pending.remove(&seq).unwrap_or_default() {
                    reclaimable += apply(index, key, kind, pos)?;
                    applied += 1;
                }
                // the marker is never live data
                reclaimable += u64::from(pos.size);
            } else if seq == NON_TXN_SEQ {
                reclaimable += apply(index, key.to_vec(), record.kind, pos)?;
                applied += 1;
            } else {
                pending
                    .entry(seq)
                    .or_default()
                    .push((key.to_vec(), record.kind, pos));
            }
            seq_no = seq_no.max(seq);
            offset += size;
        }
        segment.check_torn_tail(offset)?;
        active_end = Some(offset);
    }

    if !pending.is_empty() {
        warn!(
            batches = pending.len(),
            "discarding uncommitted batch records"
        );
    }
    debug!(applied, seq_no, "replayed segments");

    Ok(Replay {
        seq_no,
        reclaimable,
        active_end,
    })
}

/// Applies one record to the index and returns the bytes it made
/// reclaimable.
fn apply(index: &dyn Indexer, key: Vec<u8>, kind: RecordKind, pos: RecordPosition) -> Result<u64> {
    let displaced = |old: Option<RecordPosition>| old.map_or(0, |p| u64::from(p.size));
    Ok(match kind {
        RecordKind::Deleted => u64::from(pos.size) + displaced(index.delete(&key)?.0),
        _ => displaced(index.put(key, pos)?),
    })
}
