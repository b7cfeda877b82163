use std::path::PathBuf;

use thiserror::Error;

use crate::clip::ValidationError;
use crate::index::IndexError;
use crate::ingest::IngestError;
use crate::storage::StorageError;
use crate::store::RepositoryError;
use crate::transcode::TranscodeError;

#[derive(Debug, Error)]
pub enum RepairError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("index rebuild failed: {0}")]
    Index(#[from] IndexError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("invalid clip: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error("clip {clip_id} not found")]
    ClipNotFound { clip_id: String },
    #[error("clip {clip_id}: {reason}")]
    Conflict { clip_id: String, reason: String },
    #[error("key {key} does not follow the clip naming convention")]
    UnrecognizedKey { key: String },
    #[error("object storage is not configured for this run")]
    StorageUnavailable,
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("progress ledger {path} is unreadable: {source}")]
    Progress {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type RepairResult<T> = std::result::Result<T, RepairError>;
