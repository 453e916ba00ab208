use super::{keys, pos};
use crate::*;
use anyhow::Result;

// -------------------- Put / get / delete --------------------

#[test]
fn put_returns_displaced_position() -> Result<()> {
    let idx = BTreeIndex::new();
    assert_eq!(idx.put(b"k".to_vec(), pos(0, 0))?, None);
    assert_eq!(idx.put(b"k".to_vec(), pos(0, 32))?, Some(pos(0, 0)));
    assert_eq!(idx.get(b"k")?, Some(pos(0, 32)));
    assert_eq!(idx.size()?, 1);
    Ok(())
}

#[test]
fn delete_reports_presence() -> Result<()> {
    let idx = BTreeIndex::new();
    idx.put(b"a".to_vec(), pos(1, 10))?;

    assert_eq!(idx.delete(b"a")?, (Some(pos(1, 10)), true));
    assert_eq!(idx.delete(b"a")?, (None, false));
    assert_eq!(idx.get(b"a")?, None);
    assert_eq!(idx.size()?, 0);
    Ok(())
}

#[test]
fn get_missing_is_none() -> Result<()> {
    let idx = BTreeIndex::new();
    assert_eq!(idx.get(b"nope")?, None);
    Ok(())
}

// -------------------- Cursor snapshot --------------------

#[test]
fn cursor_is_a_snapshot() -> Result<()> {
    let idx = BTreeIndex::new();
    idx.put(b"a".to_vec(), pos(0, 0))?;
    idx.put(b"b".to_vec(), pos(0, 1))?;

    let mut cursor = idx.cursor(false)?;
    idx.put(b"c".to_vec(), pos(0, 2))?;
    idx.delete(b"a")?;

    assert_eq!(keys(cursor.as_mut())?, vec![b"a".to_vec(), b"b".to_vec()]);
    Ok(())
}

#[test]
fn close_is_a_no_op() -> Result<()> {
    let idx = BTreeIndex::new();
    idx.put(b"a".to_vec(), pos(0, 0))?;
    idx.close()?;
    assert_eq!(idx.get(b"a")?, Some(pos(0, 0)));
    Ok(())
}
