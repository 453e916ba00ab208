use super::helpers::{db_dir, key, options, ALL_INDEXES};
use crate::*;
use anyhow::Result;
use segment::{segment_file_name, SEQ_NO_FILE_NAME};
use std::fs::{self, OpenOptions};
use tempfile::tempdir;

// --------------------- Commit ---------------------

#[test]
fn writes_are_invisible_until_commit() -> Result<()> {
    let tmp = tempdir()?;
    let engine = Engine::open(options(&tmp))?;

    let mut batch = engine.new_write_batch(WriteBatchOptions::default());
    batch.put(b"a", b"1")?;
    batch.put(b"b", b"2")?;
    assert!(matches!(engine.get(b"a"), Err(EngineError::KeyNotFound)));
    assert_eq!(batch.len(), 2);

    batch.commit()?;
    assert!(batch.is_empty());
    assert_eq!(engine.get(b"a")?, b"1");
    assert_eq!(engine.get(b"b")?, b"2");
    Ok(())
}

#[test]
fn each_commit_takes_a_new_sequence_number() -> Result<()> {
    let tmp = tempdir()?;
    let engine = Engine::open(options(&tmp))?;
    assert_eq!(engine.seq_no(), 0);

    let mut batch = engine.new_write_batch(WriteBatchOptions::default());
    batch.commit()?;
    assert_eq!(engine.seq_no(), 0, "empty commit writes nothing");

    for i in 0..3 {
        batch.put(&key(i), b"v")?;
        batch.commit()?;
    }
    assert_eq!(engine.seq_no(), 3);

    // plain writes do not consume sequence numbers
    engine.put(b"plain", b"v")?;
    assert_eq!(engine.seq_no(), 3);
    Ok(())
}

#[test]
fn later_writes_to_a_key_win_inside_a_batch() -> Result<()> {
    let tmp = tempdir()?;
    let engine = Engine::open(options(&tmp))?;

    let mut batch = engine.new_write_batch(WriteBatchOptions::default());
    batch.put(b"k", b"first")?;
    batch.put(b"k", b"second")?;
    assert_eq!(batch.len(), 1);
    batch.commit()?;

    assert_eq!(engine.get(b"k")?, b"second");
    Ok(())
}

#[test]
fn oversized_batch_is_rejected() -> Result<()> {
    let tmp = tempdir()?;
    let engine = Engine::open(options(&tmp))?;

    let mut batch = engine.new_write_batch(WriteBatchOptions {
        max_batch_size: 2,
        sync_writes: false,
    });
    for i in 0..3 {
        batch.put(&key(i), b"v")?;
    }
    assert!(matches!(
        batch.commit(),
        Err(EngineError::ExceedMaxBatchSize { pending: 3, max: 2 })
    ));
    assert!(matches!(engine.get(&key(0)), Err(EngineError::KeyNotFound)));
    assert_eq!(engine.seq_no(), 0);
    Ok(())
}

#[test]
fn batch_validates_keys() -> Result<()> {
    let tmp = tempdir()?;
    let engine = Engine::open(options(&tmp))?;

    let mut batch = engine.new_write_batch(WriteBatchOptions::default());
    assert!(matches!(batch.put(b"", b"v"), Err(EngineError::EmptyKey)));
    assert!(matches!(batch.delete(b""), Err(EngineError::EmptyKey)));
    assert!(batch.is_empty());
    Ok(())
}

// --------------------- Deletes ---------------------

#[test]
fn delete_after_buffered_put_drops_the_put() -> Result<()> {
    let tmp = tempdir()?;
    let engine = Engine::open(options(&tmp))?;

    let mut batch = engine.new_write_batch(WriteBatchOptions::default());
    batch.put(b"fresh", b"v")?;
    batch.delete(b"fresh")?;
    assert!(batch.is_empty());

    batch.commit()?;
    assert_eq!(engine.seq_no(), 0);
    assert!(matches!(engine.get(b"fresh"), Err(EngineError::KeyNotFound)));
    Ok(())
}

#[test]
fn delete_of_live_key_survives_buffered_put() -> Result<()> {
    let tmp = tempdir()?;
    let engine = Engine::open(options(&tmp))?;
    engine.put(b"live", b"old")?;

    let mut batch = engine.new_write_batch(WriteBatchOptions::default());
    batch.put(b"live", b"new")?;
    batch.delete(b"live")?;
    assert_eq!(batch.len(), 1);
    batch.commit()?;

    assert!(matches!(engine.get(b"live"), Err(EngineError::KeyNotFound)));
    Ok(())
}

#[test]
fn unbuffered_delete_is_committed() -> Result<()> {
    for kind in ALL_INDEXES {
        let tmp = tempdir()?;
        let engine = Engine::open(options(&tmp).index_type(kind))?;
        engine.put(b"a", b"1")?;
        engine.put(b"b", b"2")?;

        let mut batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.delete(b"a")?;
        batch.put(b"c", b"3")?;
        batch.commit()?;

        assert_eq!(engine.list_keys()?, vec![b"b".to_vec(), b"c".to_vec()], "{}", kind);
    }
    Ok(())
}

// --------------------- Durability ---------------------

#[test]
fn committed_batch_survives_reopen() -> Result<()> {
    for kind in ALL_INDEXES {
        let tmp = tempdir()?;
        {
            let engine = Engine::open(options(&tmp).index_type(kind).max_segment_size(256))?;
            engine.put(b"gone", b"x")?;
            let mut batch = engine.new_write_batch(WriteBatchOptions::default());
            for i in 0..20 {
                batch.put(&key(i), &key(i))?;
            }
            batch.delete(b"gone")?;
            batch.commit()?;
            // spans several segments
            assert!(engine.segment_count() > 1, "{}", kind);
            drop(batch);
            engine.close()?;
        }

        let engine = Engine::open(options(&tmp).index_type(kind))?;
        for i in 0..20 {
            assert_eq!(engine.get(&key(i))?, key(i), "{}", kind);
        }
        assert!(matches!(engine.get(b"gone"), Err(EngineError::KeyNotFound)));
        assert_eq!(engine.seq_no(), 1, "{}", kind);
    }
    Ok(())
}

#[test]
fn crash_after_first_batch_record_discards_the_batch() -> Result<()> {
    // "plain" record is 17 bytes, each batch record 10, the marker 15
    for cut in [27, 31] {
        for kind in [IndexType::BTree, IndexType::Art] {
            let tmp = tempdir()?;
            let dir = db_dir(&tmp);
            {
                let engine = Engine::open(options(&tmp).index_type(kind))?;
                engine.put(b"plain", b"kept")?;
                let mut batch = engine.new_write_batch(WriteBatchOptions::default());
                batch.put(b"x", b"1")?;
                batch.put(b"y", b"2")?;
                batch.commit()?;
            }

            // keep the first batch record; the second is absent or torn
            let path = segment_file_name(&dir, 0);
            assert_eq!(fs::metadata(&path)?.len(), 52);
            OpenOptions::new().write(true).open(&path)?.set_len(cut)?;

            let engine = Engine::open(options(&tmp).index_type(kind))?;
            assert_eq!(engine.get(b"plain")?, b"kept", "{kind} cut at {cut}");
            assert!(matches!(engine.get(b"x"), Err(EngineError::KeyNotFound)));
            assert!(matches!(engine.get(b"y"), Err(EngineError::KeyNotFound)));
            assert_eq!(engine.list_keys()?, vec![b"plain".to_vec()]);
            assert_eq!(fs::metadata(&path)?.len(), 27, "{kind} cut at {cut}");
        }
    }
    Ok(())
}

#[test]
fn batch_without_commit_marker_is_discarded() -> Result<()> {
    for kind in [IndexType::BTree, IndexType::Art] {
        let tmp = tempdir()?;
        let dir = db_dir(&tmp);
        {
            let engine = Engine::open(options(&tmp).index_type(kind))?;
            engine.put(b"plain", b"kept")?;
            let mut batch = engine.new_write_batch(WriteBatchOptions::default());
            batch.put(b"x", b"1")?;
            batch.put(b"y", b"2")?;
            batch.commit()?;
        }

        // cut off the txn-fin marker: 7 byte header + 1 byte seq + "txn-fin"
        let path = segment_file_name(&dir, 0);
        let len = fs::metadata(&path)?.len();
        OpenOptions::new().write(true).open(&path)?.set_len(len - 15)?;

        let engine = Engine::open(options(&tmp).index_type(kind))?;
        assert_eq!(engine.get(b"plain")?, b"kept", "{}", kind);
        assert!(matches!(engine.get(b"x"), Err(EngineError::KeyNotFound)));
        assert!(matches!(engine.get(b"y"), Err(EngineError::KeyNotFound)));

        // the abandoned number is never reused
        let mut batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.put(b"z", b"3")?;
        batch.commit()?;
        assert_eq!(engine.seq_no(), 2, "{}", kind);
        drop(batch);
        drop(engine);

        let engine = Engine::open(options(&tmp).index_type(kind))?;
        assert_eq!(engine.get(b"z")?, b"3");
        assert!(matches!(engine.get(b"x"), Err(EngineError::KeyNotFound)));
    }
    Ok(())
}

#[test]
fn bptree_persists_sequence_number() -> Result<()> {
    let tmp = tempdir()?;
    let dir = db_dir(&tmp);
    {
        let engine = Engine::open(options(&tmp).index_type(IndexType::BPlusTree))?;
        let mut batch = engine.new_write_batch(WriteBatchOptions::default());
        for i in 0..4 {
            batch.put(&key(i), b"v")?;
            batch.commit()?;
        }
        drop(batch);
        engine.close()?;
    }
    assert!(dir.join(SEQ_NO_FILE_NAME).exists());

    let engine = Engine::open(options(&tmp).index_type(IndexType::BPlusTree))?;
    assert_eq!(engine.seq_no(), 4);
    assert!(!dir.join(SEQ_NO_FILE_NAME).exists());
    Ok(())
}
