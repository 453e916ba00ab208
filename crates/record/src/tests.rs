use super::*;
use proptest::prelude::*;

// -------------------- Helpers --------------------

fn put(key: &[u8], value: &[u8]) -> LogRecord {
    LogRecord::normal(key.to_vec(), value.to_vec())
}

// -------------------- Encode / decode --------------------

#[test]
fn normal_record_roundtrip() {
    let rec = put(b"name", b"alice");
    let (bytes, size) = encode(&rec);
    assert_eq!(size, bytes.len());
    // crc + kind + 1-byte varints + key + value
    assert_eq!(size, 4 + 1 + 1 + 1 + 4 + 5);

    let (decoded, consumed) = decode(&bytes).unwrap();
    assert_eq!(decoded, rec);
    assert_eq!(consumed, size);
}

#[test]
fn tombstone_has_empty_value() {
    let rec = LogRecord::tombstone(b"gone".to_vec());
    let (bytes, _) = encode(&rec);
    let (decoded, _) = decode(&bytes).unwrap();
    assert_eq!(decoded.kind, RecordKind::Deleted);
    assert!(decoded.value.is_empty());
}

#[test]
fn txn_finished_marker_carries_seq() {
    let rec = LogRecord::txn_finished(42);
    let (bytes, _) = encode(&rec);
    let (decoded, _) = decode(&bytes).unwrap();
    assert_eq!(decoded.kind, RecordKind::TxnFinished);
    let (key, seq) = parse_key_with_seq(&decoded.key).unwrap();
    assert_eq!(key, TXN_FINISHED_KEY);
    assert_eq!(seq, 42);
}

#[test]
fn empty_key_and_value_roundtrip() {
    let rec = put(b"", b"");
    let (bytes, size) = encode(&rec);
    assert_eq!(size, 7);
    assert_eq!(decode(&bytes).unwrap().0, rec);
}

#[test]
fn large_value_uses_multibyte_varint() {
    let value = vec![7u8; 300];
    let rec = put(b"k", &value);
    let (bytes, size) = encode(&rec);
    // 300 needs two varint bytes
    assert_eq!(size, 4 + 1 + 1 + 2 + 1 + 300);
    let (header, header_len) = decode_header(&bytes).unwrap();
    assert_eq!(header_len, 8);
    assert_eq!(header.value_size, 300);
    assert_eq!(decode(&bytes).unwrap().0.value, value);
}

#[test]
fn encode_is_deterministic() {
    let rec = put(b"k", b"v");
    assert_eq!(encode(&rec).0, encode(&rec).0);
}

#[test]
fn encode_into_reuses_buffer() {
    let mut buf = Vec::new();
    let first = encode_into(&put(b"aaaaaaaa", b"bbbbbbbb"), &mut buf);
    let second = encode_into(&put(b"k", b"v"), &mut buf);
    assert!(second < first);
    assert_eq!(buf.len(), second);
    assert_eq!(decode(&buf).unwrap().0, put(b"k", b"v"));
}

#[test]
fn decode_ignores_trailing_bytes() {
    let (mut bytes, size) = encode(&put(b"k", b"v"));
    bytes.extend_from_slice(b"trailing garbage");
    let (_, consumed) = decode(&bytes).unwrap();
    assert_eq!(consumed, size);
}

// -------------------- Header --------------------

#[test]
fn header_needs_more_than_crc() {
    assert!(decode_header(&[]).is_none());
    assert!(decode_header(&[1, 2, 3]).is_none());
    assert!(decode_header(&[1, 2, 3, 4]).is_none());
}

#[test]
fn header_with_incomplete_varint_is_none() {
    // crc, kind, then a continuation byte with nothing after it
    assert!(decode_header(&[0, 0, 0, 0, 0, 0x80]).is_none());
}

#[test]
fn header_fields_match_record() {
    let (bytes, _) = encode(&put(b"abc", b"defgh"));
    let (header, len) = decode_header(&bytes).unwrap();
    assert_eq!(len, 7);
    assert_eq!(header.kind, RecordKind::Normal as u8);
    assert_eq!(header.key_size, 3);
    assert_eq!(header.value_size, 5);
    assert_eq!(header.body_len(), 8);
}

// -------------------- Corruption --------------------

#[test]
fn every_single_byte_flip_is_detected() {
    let (bytes, _) = encode(&put(b"some-key", b"some-value"));
    for i in 0..bytes.len() {
        let mut corrupt = bytes.clone();
        corrupt[i] ^= 0xff;
        assert!(decode(&corrupt).is_err(), "flip at byte {} went unnoticed", i);
    }
}

#[test]
fn bad_crc_reports_mismatch() {
    let (mut bytes, _) = encode(&put(b"k", b"v"));
    bytes[0] ^= 0x01;
    assert!(matches!(
        decode(&bytes),
        Err(RecordError::ChecksumMismatch { .. })
    ));
}

#[test]
fn truncated_body_is_reported() {
    let (bytes, size) = encode(&put(b"key", b"value"));
    let err = decode(&bytes[..size - 2]).unwrap_err();
    assert_eq!(
        err,
        RecordError::Truncated {
            needed: size,
            available: size - 2
        }
    );
}

#[test]
fn unknown_kind_with_valid_crc_is_rejected() {
    let (mut bytes, _) = encode(&put(b"k", b"v"));
    bytes[CRC_SIZE] = 9;
    let crc = record_crc(&bytes[CRC_SIZE..7], b"k", b"v");
    LittleEndian::write_u32(&mut bytes[..CRC_SIZE], crc);
    assert_eq!(decode(&bytes).unwrap_err(), RecordError::UnknownKind(9));
}

// -------------------- Positions --------------------

#[test]
fn position_roundtrip() {
    let pos = RecordPosition {
        segment_id: 17,
        offset: 1 << 40,
        size: 1234,
    };
    assert_eq!(decode_position(&encode_position(&pos)).unwrap(), pos);
}

#[test]
fn position_from_garbage_fails() {
    assert_eq!(
        decode_position(&[0x80]).unwrap_err(),
        RecordError::MalformedVarint
    );
    assert!(decode_position(&[]).is_err());
}

// -------------------- Sequence framing --------------------

#[test]
fn key_with_seq_zero_is_one_byte_prefix() {
    let stored = key_with_seq(b"user", NON_TXN_SEQ);
    assert_eq!(stored, b"\x00user");
    let (key, seq) = parse_key_with_seq(&stored).unwrap();
    assert_eq!(key, b"user");
    assert_eq!(seq, 0);
}

#[test]
fn key_with_large_seq_roundtrip() {
    let stored = key_with_seq(b"k", u64::MAX);
    assert_eq!(stored.len(), MAX_VARINT_LEN_U64 + 1);
    assert_eq!(parse_key_with_seq(&stored).unwrap(), (&b"k"[..], u64::MAX));
}

#[test]
fn uvarint_rejects_overflow() {
    let too_long = [0xffu8; 11];
    assert!(read_uvarint(&too_long).is_none());
    let mut tenth_byte_too_big = vec![0xffu8; 9];
    tenth_byte_too_big.push(0x02);
    assert!(read_uvarint(&tenth_byte_too_big).is_none());
}

// -------------------- Properties --------------------

fn kind_strategy() -> impl Strategy<Value = RecordKind> {
    prop_oneof![
        Just(RecordKind::Normal),
        Just(RecordKind::Deleted),
        Just(RecordKind::TxnFinished),
    ]
}

proptest! {
    #[test]
    fn decode_inverts_encode(
        key in prop::collection::vec(any::<u8>(), 0..64),
        value in prop::collection::vec(any::<u8>(), 0..512),
        kind in kind_strategy(),
    ) {
        let rec = LogRecord { key, value, kind };
        let (bytes, size) = encode(&rec);
        let (decoded, consumed) = decode(&bytes).unwrap();
        prop_assert_eq!(decoded, rec);
        prop_assert_eq!(consumed, size);
    }

    #[test]
    fn single_byte_corruption_is_detected(
        key in prop::collection::vec(any::<u8>(), 1..32),
        value in prop::collection::vec(any::<u8>(), 0..128),
        index in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let (mut bytes, size) = encode(&LogRecord::normal(key, value));
        bytes[index.index(size)] ^= flip;
        prop_assert!(decode(&bytes).is_err());
    }

    #[test]
    fn position_codec_roundtrip(segment_id in any::<u32>(), offset in any::<u64>(), size in any::<u32>()) {
        let pos = RecordPosition { segment_id, offset, size };
        prop_assert_eq!(decode_position(&encode_position(&pos)).unwrap(), pos);
    }
}
