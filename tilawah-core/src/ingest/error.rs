use std::path::PathBuf;

use thiserror::Error;

use crate::clip::ValidationError;
use crate::hasher::HashError;
use crate::index::IndexError;
use crate::storage::StorageError;
use crate::store::ClipStoreError;
use crate::transcode::TranscodeError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid clip: {0}")]
    Validation(#[from] ValidationError),
    #[error("unsupported source media {path}")]
    UnsupportedMedia { path: PathBuf },
    #[error(transparent)]
    Hash(#[from] HashError),
    /// The same bytes are already committed under another clip id.
    #[error("content {digest} already belongs to clip {existing_id}")]
    Conflict { existing_id: String, digest: String },
    /// The clip id is taken by different content and overwrite was not requested.
    #[error("clip {clip_id} already exists with different content (stored {stored:?}, incoming {incoming})")]
    AlreadyPresent {
        clip_id: String,
        stored: Option<String>,
        incoming: String,
    },
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("metadata store failed: {0}")]
    Store(#[from] ClipStoreError),
    #[error("clip log failed: {0}")]
    Index(#[from] IndexError),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
