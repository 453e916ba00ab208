/// Storage statistics.
use std::fs;

use crate::{Engine, Result};

/// Snapshot of the engine's size counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Live keys in the index.
    pub key_count: usize,
    /// Segment files, active one included.
    pub segment_count: usize,
    /// Bytes a merge could reclaim. Approximate after a restart with the
    /// B+Tree index, which does not replay the log.
    pub reclaimable_size: u64,
    /// Total size of the files in the data directory.
    pub disk_size: u64,
}

impl Engine {
    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read();
        let mut disk_size = 0;
        for entry in fs::read_dir(&self.options.dir_path)? {
            let meta = entry?.metadata()?;
            if meta.is_file() {
                disk_size += meta.len();
            }
        }
        Ok(Stat {
            key_count: self.index.size()?,
            segment_count: state.segment_count(),
            reclaimable_size: state.reclaimable,
            disk_size,
        })
    }
}
