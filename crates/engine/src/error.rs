use config::ConfigError;
use index::IndexError;
use record::RecordError;
use segment::SegmentError;
use thiserror::Error;

/// Errors returned by [`Engine`](crate::Engine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("key must not be empty")]
    EmptyKey,

    #[error("key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    /// The key is absent, or its latest record is a tombstone.
    #[error("key not found")]
    KeyNotFound,

    /// The index refused a mutation the engine relied on.
    #[error("failed to update index")]
    IndexUpdateFailed,

    #[error(transparent)]
    Index(#[from] IndexError),

    /// An index position points at a segment the engine does not know.
    #[error("segment {0} not found")]
    SegmentNotFound(u32),

    #[error("corrupt record in segment {segment_id} at offset {offset}: {source}")]
    CorruptRecord {
        segment_id: u32,
        offset: u64,
        source: RecordError,
    },

    /// A file in the data directory does not follow the naming scheme.
    #[error("unexpected file in data directory: {0}")]
    DirectoryCorrupted(String),

    #[error("batch holds {pending} writes, more than the maximum of {max}")]
    ExceedMaxBatchSize { pending: usize, max: usize },

    #[error("a merge is already in progress")]
    MergeInProgress,

    /// Another engine holds the directory lock.
    #[error("data directory is in use by another engine")]
    DatabaseInUse,

    #[error("invalid options: {0}")]
    InvalidOptions(#[from] ConfigError),

    /// A merge-finished or seq-no file could not be parsed.
    #[error("invalid marker file '{0}'")]
    InvalidMarker(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SegmentError> for EngineError {
    fn from(e: SegmentError) -> Self {
        match e {
            SegmentError::Io(e) => EngineError::Io(e),
            SegmentError::Corrupt {
                segment_id,
                offset,
                source,
            } => EngineError::CorruptRecord {
                segment_id,
                offset,
                source,
            },
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
