use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use super::{DeleteFailure, StorageResult};

pub const MD5_METADATA_KEY: &str = "md5";
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectMetadata {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ObjectMetadata {
    /// Stored content digest: the `md5` metadata field, or a single-part ETag.
    ///
    /// Multipart ETags carry a `-N` suffix and are not content digests.
    pub fn content_digest(&self) -> Option<String> {
        if let Some(md5) = self.metadata.get(MD5_METADATA_KEY) {
            return Some(md5.to_ascii_lowercase());
        }
        let etag = self.etag.as_deref()?.trim_matches('"');
        if etag.len() == 32 && etag.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(etag.to_ascii_lowercase())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub content_type: String,
    pub content_length: u64,
    pub cache_control: String,
    pub metadata: BTreeMap<String, String>,
}

/// Raw object-store calls. One call, one attempt; retry policy lives in
/// [`super::StorageClient`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectMetadata>>;

    async fn get_to_file(&self, key: &str, dest: &Path) -> StorageResult<u64>;

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn put_file(&self, key: &str, source: &Path, request: &PutRequest) -> StorageResult<()>;

    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()>;

    /// Deletes at most 1000 keys, returning per-key failures.
    async fn delete_batch(&self, keys: &[String]) -> StorageResult<Vec<DeleteFailure>>;

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
