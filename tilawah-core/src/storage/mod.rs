mod backend;
mod client;
mod error;
pub mod memory;
mod public;
mod retry;
mod s3;

pub use backend::{ObjectMetadata, ObjectStore, PutRequest, IMMUTABLE_CACHE_CONTROL, MD5_METADATA_KEY};
pub use client::{
    normalize_key, CopyOutcome, DeleteSummary, StorageClient, UploadOptions, UploadOutcome,
    UploadStatus, DELETE_BATCH_SIZE,
};
pub use error::{DeleteFailure, StorageError, StorageResult, TransientCause};
pub use memory::InMemoryObjectStore;
pub use public::PublicUrlResolver;
pub use retry::{OperationClass, RetryPolicy};
pub use s3::S3ObjectStore;
