use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("clip {clip_id} not found")]
    NotFound { clip_id: String },
    #[error("clip {clip_id} already exists")]
    AlreadyExists { clip_id: String },
    #[error("clip store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type ClipStoreResult<T> = std::result::Result<T, ClipStoreError>;
