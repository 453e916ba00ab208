use crate::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Data directory inside `tmp`, so the `-merge` sibling stays inside it too.
pub fn db_dir(tmp: &TempDir) -> PathBuf {
    tmp.path().join("db")
}

pub fn options(tmp: &TempDir) -> Options {
    Options::new(db_dir(tmp)).mmap_at_startup(false)
}

pub fn count_data_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "data")
                .unwrap_or(false)
        })
        .count()
}

/// `key-0007`-style keys that sort in numeric order.
pub fn key(i: usize) -> Vec<u8> {
    format!("key-{i:04}").into_bytes()
}

pub fn value(i: usize, len: usize) -> Vec<u8> {
    let mut v = format!("value-{i}-").into_bytes();
    v.resize(len.max(v.len()), b'x');
    v
}

pub const ALL_INDEXES: [IndexType; 3] = [IndexType::BTree, IndexType::Art, IndexType::BPlusTree];
