//! # Segment - Append-Only Log Files
//!
//! A segment is one append-only file of encoded [`LogRecord`]s. The engine
//! keeps exactly one *active* segment open for appends; every other segment is
//! immutable and only read.
//!
//! ## On-Disk Layout
//!
//! ```text
//! <dir>/
//!   0000000000.data      segment 0 (oldest)
//!   0000000001.data
//!   0000000002.data      active segment (highest id)
//!   hint-index           key -> position snapshot written by merge
//!   merge-finished       single record: merge boundary
//!   seq-no               single record: sequence number (B+Tree index only)
//! ```
//!
//! Hint, merge-finished and seq-no files use the same record framing as data
//! segments, so they are opened as [`Segment`]s too.
//!
//! ## Reads
//!
//! [`Segment::read_record`] reads a header-sized window, then exactly the key
//! and value bytes, and verifies the checksum. Running into the end of the file
//! (including a torn tail from a crash mid-append) is reported as `Ok(None)`.
//! Recovery then calls [`Segment::check_torn_tail`] to tell a crash tail
//! apart from a damaged header with valid records behind it.

mod io;

pub use io::{open_io, FileIo, IoKind, IoManager, MmapIo};

use record::{
    decode, decode_header, encode, encode_position, record_crc, LogRecord, RecordError, RecordKind,
    RecordPosition, CRC_SIZE, MAX_HEADER_SIZE,
};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Extension of data segment files.
pub const SEGMENT_FILE_SUFFIX: &str = "data";

/// Key -> position snapshot produced by merge.
pub const HINT_FILE_NAME: &str = "hint-index";

/// Marker proving a merge finished; holds the merge boundary.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// Sequence number persisted at close when the index is on disk.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// Errors produced by segment I/O.
#[derive(Debug, Error)]
pub enum SegmentError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record failed checksum validation or carried an unknown kind.
    #[error("corrupt record in segment {segment_id} at offset {offset}: {source}")]
    Corrupt {
        segment_id: u32,
        offset: u64,
        source: RecordError,
    },
}

/// Path of the data file for segment `id`: `<dir>/<10-digit id>.data`.
pub fn segment_file_name(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{:010}.{}", id, SEGMENT_FILE_SUFFIX))
}

/// One append-only record file.
pub struct Segment {
    id: u32,
    path: PathBuf,
    write_offset: u64,
    io: Box<dyn IoManager>,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("write_offset", &self.write_offset)
            .finish()
    }
}

impl Segment {
    /// Opens (or creates) data segment `id` in `dir`.
    ///
    /// The write offset starts at zero; recovery moves it to the end of the
    /// last valid record.
    pub fn open(dir: &Path, id: u32, kind: IoKind) -> Result<Self, SegmentError> {
        Self::open_path(segment_file_name(dir, id), id, kind)
    }

    /// Opens (or creates) the hint file in `dir`.
    pub fn open_hint(dir: &Path) -> Result<Self, SegmentError> {
        Self::open_path(dir.join(HINT_FILE_NAME), 0, IoKind::File)
    }

    /// Opens (or creates) the merge-finished marker in `dir`.
    pub fn open_merge_finished(dir: &Path) -> Result<Self, SegmentError> {
        Self::open_path(dir.join(MERGE_FINISHED_FILE_NAME), 0, IoKind::File)
    }

    /// Opens (or creates) the sequence number file in `dir`.
    pub fn open_seq_no(dir: &Path) -> Result<Self, SegmentError> {
        Self::open_path(dir.join(SEQ_NO_FILE_NAME), 0, IoKind::File)
    }

    fn open_path(path: PathBuf, id: u32, kind: IoKind) -> Result<Self, SegmentError> {
        let io = open_io(&path, kind)?;
        Ok(Self {
            id,
            path,
            write_offset: 0,
            io,
        })
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset the next append lands at.
    #[must_use]
    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// Current size of the backing file.
    pub fn size(&self) -> Result<u64, SegmentError> {
        Ok(self.io.size()?)
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns the record and its encoded length, or `Ok(None)` when no
    /// complete record starts at `offset`.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::Corrupt`] on checksum mismatch or unknown kind.
    /// - [`SegmentError::Io`] if the read itself fails.
    pub fn read_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>, SegmentError> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // header window, clamped to the end of the file
        let window = (file_size - offset).min(MAX_HEADER_SIZE as u64) as usize;
        let mut header_buf = [0u8; MAX_HEADER_SIZE];
        let n = self.io.read(&mut header_buf[..window], offset)?;
        let Some((header, header_len)) = decode_header(&header_buf[..n]) else {
            return Ok(None);
        };

        let body_len = header.body_len();
        let body_offset = offset + header_len as u64;
        if body_offset + body_len as u64 > file_size {
            // torn tail
            return Ok(None);
        }

        let mut key = vec![0u8; body_len];
        if body_len > 0 && self.io.read(&mut key, body_offset)? < body_len {
            return Ok(None);
        }
        let value = key.split_off(header.key_size as usize);

        let corrupt = |source| SegmentError::Corrupt {
            segment_id: self.id,
            offset,
            source,
        };

        let computed = record_crc(&header_buf[CRC_SIZE..header_len], &key, &value);
        if computed != header.crc {
            return Err(corrupt(RecordError::ChecksumMismatch {
                stored: header.crc,
                computed,
            }));
        }
        let kind = RecordKind::try_from(header.kind).map_err(corrupt)?;

        Ok(Some((
            LogRecord { key, value, kind },
            (header_len + body_len) as u64,
        )))
    }

    /// Checks that the bytes from `offset` to the end of the file, where
    /// [`read_record`](Self::read_record) found no complete record, are a torn
    /// final append.
    ///
    /// A crash mid-append leaves a prefix of one record and nothing after it.
    /// If a checksum-valid record starts anywhere past `offset`, the header at
    /// `offset` was damaged instead.
    ///
    /// # Errors
    ///
    /// - [`SegmentError::Corrupt`] if a valid record follows `offset`.
    /// - [`SegmentError::Io`] if the read fails.
    pub fn check_torn_tail(&self, offset: u64) -> Result<(), SegmentError> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(());
        }
        let mut tail = vec![0u8; (file_size - offset) as usize];
        let n = self.io.read(&mut tail, offset)?;
        tail.truncate(n);

        if !(1..tail.len()).any(|start| decode(&tail[start..]).is_ok()) {
            return Ok(());
        }
        let source = match decode(&tail) {
            Err(e) => e,
            Ok(_) => RecordError::Truncated {
                needed: tail.len() + 1,
                available: tail.len(),
            },
        };
        Err(SegmentError::Corrupt {
            segment_id: self.id,
            offset,
            source,
        })
    }

    /// Appends raw encoded bytes and advances the write offset.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), SegmentError> {
        let n = self.io.write(buf)?;
        self.write_offset += n as u64;
        Ok(())
    }

    /// Appends a hint entry: a `Normal` record whose value is the encoded
    /// position of `key`.
    pub fn write_hint_record(&mut self, key: &[u8], pos: &RecordPosition) -> Result<(), SegmentError> {
        let (bytes, _) = encode(&LogRecord::normal(key.to_vec(), encode_position(pos)));
        self.write(&bytes)
    }

    pub fn sync(&self) -> Result<(), SegmentError> {
        Ok(self.io.sync()?)
    }

    /// Reopens the backing file with a different I/O backend.
    pub fn set_io_kind(&mut self, kind: IoKind) -> Result<(), SegmentError> {
        self.set_io(open_io(&self.path, kind)?);
        Ok(())
    }

    /// Swaps in an already opened handle for the backing file.
    pub fn set_io(&mut self, io: Box<dyn IoManager>) {
        self.io = io;
    }

    /// Cuts everything past `len` and moves the write offset there.
    pub fn truncate_tail(&mut self, len: u64) -> Result<(), SegmentError> {
        let size = self.io.size()?;
        if size > len {
            debug!(segment = self.id, from = size, to = len, "truncating segment tail");
            self.io.truncate(len)?;
        }
        self.write_offset = len;
        Ok(())
    }
}
