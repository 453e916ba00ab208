mod btree_tests;

use record::RecordPosition;

pub(crate) fn pos(segment_id: u32, offset: u64) -> RecordPosition {
    RecordPosition {
        segment_id,
        offset,
        size: 16,
    }
}

/// Drains a cursor into its keys.
pub(crate) fn keys(cursor: &mut dyn crate::IndexCursor) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    while let Some(key) = cursor.key() {
        out.push(key.to_vec());
        cursor.next()?;
    }
    Ok(out)
}
