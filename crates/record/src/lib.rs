//! # Record - Log Record Codec
//!
//! Binary framing for every entry CaskKV appends to a segment file, plus the
//! compact encoding of index positions used by hint files and the on-disk
//! B+Tree index.
//!
//! ## Binary Record Format
//!
//! ```text
//! [crc32: u32 LE][kind: u8][key_size: uvarint][value_size: uvarint][key][value]
//! ```
//!
//! The CRC32 covers everything after itself. Sizes are LEB128 varints of at
//! most 5 bytes, so a header never exceeds [`MAX_HEADER_SIZE`] bytes.
//!
//! Stored keys are framed with the sequence number of the write that produced
//! them (`[seq: uvarint][user key]`, see [`key_with_seq`]). Sequence number `0`
//! marks a non-transactional write; batch commits share one non-zero number
//! and end with a [`RecordKind::TxnFinished`] record.
//!
//! ## Example
//!
//! ```rust
//! use record::{decode, encode, LogRecord};
//!
//! let rec = LogRecord::normal(b"hello".to_vec(), b"world".to_vec());
//! let (bytes, size) = encode(&rec);
//! assert_eq!(bytes.len(), size);
//!
//! let (decoded, consumed) = decode(&bytes).unwrap();
//! assert_eq!(decoded, rec);
//! assert_eq!(consumed, size);
//! ```

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use thiserror::Error;

/// Length of the CRC field at the start of every record.
pub const CRC_SIZE: usize = 4;

/// Longest LEB128 encoding of a `u32`.
pub const MAX_VARINT_LEN_U32: usize = 5;

/// Longest LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN_U64: usize = 10;

/// Upper bound of an encoded header: crc + kind + two `u32` varints.
pub const MAX_HEADER_SIZE: usize = CRC_SIZE + 1 + MAX_VARINT_LEN_U32 * 2;

/// Sequence number carried by writes outside of a batch.
pub const NON_TXN_SEQ: u64 = 0;

/// User key of the marker record that closes a batch commit.
pub const TXN_FINISHED_KEY: &[u8] = b"txn-fin";

/// Errors produced while decoding records and positions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The stored checksum does not match the record contents.
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC read from the record header.
        stored: u32,
        /// CRC recomputed over the record contents.
        computed: u32,
    },

    /// The buffer ends before the record does.
    #[error("truncated record: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes the header claims the record occupies.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The kind byte is not one of the known record kinds.
    #[error("unknown record kind {0}")]
    UnknownKind(u8),

    /// A varint was malformed or overflowed its type.
    #[error("malformed varint")]
    MalformedVarint,
}

/// Semantics of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// A live key/value pair.
    Normal = 0,
    /// A tombstone.
    Deleted = 1,
    /// Commit marker for a batch's sequence number.
    TxnFinished = 2,
}

impl TryFrom<u8> for RecordKind {
    type Error = RecordError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        match b {
            0 => Ok(RecordKind::Normal),
            1 => Ok(RecordKind::Deleted),
            2 => Ok(RecordKind::TxnFinished),
            other => Err(RecordError::UnknownKind(other)),
        }
    }
}

/// A single entry of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Stored key (normally framed with a sequence number).
    pub key: Vec<u8>,
    /// Payload; empty for tombstones and commit markers.
    pub value: Vec<u8>,
    /// Record semantics.
    pub kind: RecordKind,
}

impl LogRecord {
    /// A live key/value record.
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            kind: RecordKind::Normal,
        }
    }

    /// A tombstone for `key`.
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            kind: RecordKind::Deleted,
        }
    }

    /// The marker that commits every record written with `seq`.
    pub fn txn_finished(seq: u64) -> Self {
        Self {
            key: key_with_seq(TXN_FINISHED_KEY, seq),
            value: Vec::new(),
            kind: RecordKind::TxnFinished,
        }
    }
}

/// Decoded fixed part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Stored checksum.
    pub crc: u32,
    /// Raw kind byte (validated after the checksum).
    pub kind: u8,
    /// Length of the key in bytes.
    pub key_size: u32,
    /// Length of the value in bytes.
    pub value_size: u32,
}

impl RecordHeader {
    /// Number of key + value bytes that follow the header.
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.key_size as usize + self.value_size as usize
    }
}

/// Location of one encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordPosition {
    /// Segment holding the record.
    pub segment_id: u32,
    /// Byte offset of the record inside the segment.
    pub offset: u64,
    /// Encoded length of the record.
    pub size: u32,
}

/// Appends the LEB128 encoding of `value` to `buf`.
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Reads a LEB128 `u64` from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// varint is incomplete or overflows.
pub fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_LEN_U64 || (i == MAX_VARINT_LEN_U64 - 1 && byte > 1) {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

fn read_uvarint_u32(buf: &[u8]) -> Option<(u32, usize)> {
    let (v, n) = read_uvarint(buf)?;
    if n > MAX_VARINT_LEN_U32 {
        return None;
    }
    u32::try_from(v).ok().map(|v| (v, n))
}

/// Encodes `record`, returning the bytes and their length.
pub fn encode(record: &LogRecord) -> (Vec<u8>, usize) {
    let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + record.key.len() + record.value.len());
    let size = encode_into(record, &mut buf);
    (buf, size)
}

/// Encodes `record` into `buf` (cleared first), returning the encoded length.
///
/// Lets hot paths reuse one allocation across appends.
pub fn encode_into(record: &LogRecord, buf: &mut Vec<u8>) -> usize {
    buf.clear();

    // crc placeholder, filled once the rest is in place
    buf.extend_from_slice(&[0u8; CRC_SIZE]);
    buf.push(record.kind as u8);
    put_uvarint(buf, record.key.len() as u64);
    put_uvarint(buf, record.value.len() as u64);
    buf.extend_from_slice(&record.key);
    buf.extend_from_slice(&record.value);

    let mut hasher = Crc32::new();
    hasher.update(&buf[CRC_SIZE..]);
    let crc = hasher.finalize();
    LittleEndian::write_u32(&mut buf[..CRC_SIZE], crc);

    buf.len()
}

/// Parses a record header from the front of `buf`.
///
/// Returns `None` when fewer than [`CRC_SIZE`] bytes are available or a size
/// varint is incomplete; callers scanning a segment treat that as the end of
/// the readable region.
pub fn decode_header(buf: &[u8]) -> Option<(RecordHeader, usize)> {
    if buf.len() <= CRC_SIZE {
        return None;
    }
    let crc = LittleEndian::read_u32(&buf[..CRC_SIZE]);
    let kind = buf[CRC_SIZE];

    let mut index = CRC_SIZE + 1;
    let (key_size, n) = read_uvarint_u32(&buf[index..])?;
    index += n;
    let (value_size, n) = read_uvarint_u32(&buf[index..])?;
    index += n;

    Some((
        RecordHeader {
            crc,
            kind,
            key_size,
            value_size,
        },
        index,
    ))
}

/// Checksum of a record given its header bytes after the CRC field.
pub fn record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Decodes one record from the front of `buf`, verifying its checksum.
///
/// Returns the record and the number of bytes it occupied.
///
/// # Errors
///
/// - [`RecordError::Truncated`] if the buffer ends inside the record.
/// - [`RecordError::ChecksumMismatch`] if the contents were altered.
/// - [`RecordError::UnknownKind`] if the kind byte is invalid.
pub fn decode(buf: &[u8]) -> Result<(LogRecord, usize), RecordError> {
    let (header, header_len) = decode_header(buf).ok_or(RecordError::Truncated {
        needed: CRC_SIZE + 3,
        available: buf.len(),
    })?;

    let total = header_len + header.body_len();
    if buf.len() < total {
        return Err(RecordError::Truncated {
            needed: total,
            available: buf.len(),
        });
    }

    let key_end = header_len + header.key_size as usize;
    let key = &buf[header_len..key_end];
    let value = &buf[key_end..total];

    let computed = record_crc(&buf[CRC_SIZE..header_len], key, value);
    if computed != header.crc {
        return Err(RecordError::ChecksumMismatch {
            stored: header.crc,
            computed,
        });
    }

    let kind = RecordKind::try_from(header.kind)?;
    Ok((
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            kind,
        },
        total,
    ))
}

/// Encodes a position as three varints: segment id, offset, size.
pub fn encode_position(pos: &RecordPosition) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN_U32 * 2 + MAX_VARINT_LEN_U64);
    put_uvarint(&mut buf, u64::from(pos.segment_id));
    put_uvarint(&mut buf, pos.offset);
    put_uvarint(&mut buf, u64::from(pos.size));
    buf
}

/// Decodes a position written by [`encode_position`].
///
/// # Errors
///
/// Returns [`RecordError::MalformedVarint`] if any field is missing or out of
/// range.
pub fn decode_position(buf: &[u8]) -> Result<RecordPosition, RecordError> {
    let (segment_id, a) = read_uvarint_u32(buf).ok_or(RecordError::MalformedVarint)?;
    let (offset, b) = read_uvarint(&buf[a..]).ok_or(RecordError::MalformedVarint)?;
    let (size, _) = read_uvarint_u32(&buf[a + b..]).ok_or(RecordError::MalformedVarint)?;
    Ok(RecordPosition {
        segment_id,
        offset,
        size,
    })
}

/// Frames a user key with the sequence number of the write.
pub fn key_with_seq(key: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN_U64 + key.len());
    put_uvarint(&mut buf, seq);
    buf.extend_from_slice(key);
    buf
}

/// Splits a stored key into the user key and its sequence number.
///
/// # Errors
///
/// Returns [`RecordError::MalformedVarint`] if the sequence prefix is invalid.
pub fn parse_key_with_seq(stored: &[u8]) -> Result<(&[u8], u64), RecordError> {
    let (seq, n) = read_uvarint(stored).ok_or(RecordError::MalformedVarint)?;
    Ok((&stored[n..], seq))
}

#[cfg(test)]
mod tests;
