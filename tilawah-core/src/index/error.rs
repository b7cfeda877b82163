use std::path::PathBuf;

use thiserror::Error;

use crate::clip::ValidationError;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line} is not a valid clip record: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
    #[error("record {line} failed validation: {source}")]
    Validation {
        line: usize,
        source: ValidationError,
    },
    /// Duplicate ids abort the whole batch.
    #[error("duplicate clip id {id} at records {first} and {duplicate}")]
    Consistency {
        id: String,
        first: usize,
        duplicate: usize,
    },
    #[error("clip {id} not found in log")]
    NotFound { id: String },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;
