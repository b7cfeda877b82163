use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::clip::content_type_for;
use crate::hasher::digest_file;

use super::backend::{
    ObjectMetadata, ObjectStore, PutRequest, IMMUTABLE_CACHE_CONTROL, MD5_METADATA_KEY,
};
use super::retry::{OperationClass, RetryPolicy};
use super::{DeleteFailure, StorageError, StorageResult};

pub const DELETE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    /// Lowercase hex digest; computed from the file when absent.
    pub md5: Option<String>,
    pub overwrite: bool,
}

impl UploadOptions {
    pub fn with_md5(md5: impl Into<String>) -> Self {
        Self {
            md5: Some(md5.into()),
            ..Self::default()
        }
    }

    pub fn overwrite(mut self, value: bool) -> Self {
        self.overwrite = value;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploaded,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub key: String,
    pub md5: String,
    pub size: u64,
    pub status: UploadStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyOutcome {
    pub copied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub deleted_count: usize,
}

/// Retrying, conflict-aware front for an [`ObjectStore`] backend.
#[derive(Clone)]
pub struct StorageClient {
    backend: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("retry", &self.retry)
            .finish()
    }
}

impl StorageClient {
    pub fn new(backend: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    async fn with_retry<F, Fut, T>(
        &self,
        operation: &'static str,
        key: &str,
        class: OperationClass,
        mut call: F,
    ) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let attempts = self.retry.attempts_for(class);
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(cause) = err.transient_cause() else {
                        return Err(err);
                    };
                    attempt += 1;
                    if attempt >= attempts {
                        warn!(operation, key, attempts, cause = %cause, "storage retries exhausted");
                        return Err(StorageError::RetriesExhausted {
                            operation,
                            key: key.to_string(),
                            attempts,
                            cause,
                        });
                    }
                    let wait = self.retry.compute_delay(attempt - 1);
                    warn!(operation, key, attempt, wait = ?wait, cause = %cause, "retrying storage operation");
                    if !wait.is_zero() {
                        sleep(wait).await;
                    }
                }
            }
        }
    }

    pub async fn head(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        let key = normalize_key(key);
        self.with_retry("head", key, OperationClass::Metadata, || self.backend.head(key))
            .await
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.head(key).await?.is_some())
    }

    pub async fn download(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let key = normalize_key(key);
        let bytes = self
            .with_retry("get", key, OperationClass::Transfer, || {
                self.backend.get_to_file(key, dest)
            })
            .await?;
        debug!(key, dest = %dest.display(), bytes, "downloaded object");
        Ok(bytes)
    }

    pub async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let key = normalize_key(key);
        self.with_retry("get", key, OperationClass::Transfer, || {
            self.backend.get_bytes(key)
        })
        .await
    }

    /// Uploads with the digest as metadata and an immutable cache header.
    ///
    /// An object already holding the same digest is left alone. A different
    /// or unknown digest at the destination is a conflict unless `overwrite`.
    pub async fn upload(&self, key: &str, source: &Path, options: UploadOptions) -> StorageResult<UploadOutcome> {
        let key = normalize_key(key);
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|err| StorageError::Io {
                path: source.to_path_buf(),
                source: err,
            })?
            .len();
        let md5 = match options.md5 {
            Some(md5) => md5.to_ascii_lowercase(),
            None => digest_file(source).await.map_err(|err| match err {
                crate::hasher::HashError::Io { path, source } => StorageError::Io { path, source },
            })?,
        };

        if let Some(existing) = self.head(key).await? {
            let stored = existing.content_digest();
            if stored.as_deref() == Some(md5.as_str()) {
                info!(key, md5 = %md5, "skip upload, identical content already present");
                return Ok(UploadOutcome {
                    key: key.to_string(),
                    md5,
                    size,
                    status: UploadStatus::AlreadyPresent,
                });
            }
            if !options.overwrite {
                return Err(StorageError::Conflict {
                    key: key.to_string(),
                    existing: stored,
                    incoming: md5,
                });
            }
            warn!(key, existing = ?stored, incoming = %md5, "overwriting object with different content");
        }

        let mut metadata = BTreeMap::new();
        metadata.insert(MD5_METADATA_KEY.to_string(), md5.clone());
        let request = PutRequest {
            content_type: options
                .content_type
                .unwrap_or_else(|| content_type_for(key).to_string()),
            content_length: size,
            cache_control: IMMUTABLE_CACHE_CONTROL.to_string(),
            metadata,
        };
        self.with_retry("put", key, OperationClass::Transfer, || {
            self.backend.put_file(key, source, &request)
        })
        .await?;
        info!(key, size, md5 = %md5, "uploaded object");
        Ok(UploadOutcome {
            key: key.to_string(),
            md5,
            size,
            status: UploadStatus::Uploaded,
        })
    }

    /// Server-side copy. An existing destination is reported, not an error, unless `overwrite`.
    pub async fn copy(&self, from_key: &str, to_key: &str, overwrite: bool) -> StorageResult<CopyOutcome> {
        let from_key = normalize_key(from_key);
        let to_key = normalize_key(to_key);
        if from_key == to_key {
            return Ok(CopyOutcome {
                copied: false,
                reason: Some("source and destination are the same key".into()),
            });
        }
        if !overwrite && self.exists(to_key).await? {
            return Ok(CopyOutcome {
                copied: false,
                reason: Some("destination exists".into()),
            });
        }
        if !self.exists(from_key).await? {
            return Err(StorageError::NotFound {
                key: from_key.to_string(),
            });
        }
        self.with_retry("copy", to_key, OperationClass::Metadata, || {
            self.backend.copy(from_key, to_key)
        })
        .await?;
        info!(from = from_key, to = to_key, "copied object");
        Ok(CopyOutcome {
            copied: true,
            reason: None,
        })
    }

    /// Deduplicated, slash-stripped, batched delete; per-key failures are aggregated.
    pub async fn delete(&self, keys: &[String]) -> StorageResult<DeleteSummary> {
        let unique: BTreeSet<String> = keys
            .iter()
            .map(|key| normalize_key(key))
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();
        let unique: Vec<String> = unique.into_iter().collect();
        let mut failures: Vec<DeleteFailure> = Vec::new();
        let mut deleted = 0usize;
        for batch in unique.chunks(DELETE_BATCH_SIZE) {
            let label = batch.first().map(String::as_str).unwrap_or_default();
            let batch_failures = self
                .with_retry("delete", label, OperationClass::Metadata, || {
                    self.backend.delete_batch(batch)
                })
                .await?;
            deleted += batch.len() - batch_failures.len();
            failures.extend(batch_failures);
        }
        if !failures.is_empty() {
            return Err(StorageError::DeleteFailed {
                requested: unique.len(),
                failures,
            });
        }
        info!(deleted, "deleted objects");
        Ok(DeleteSummary {
            deleted_count: deleted,
        })
    }

    pub async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = normalize_key(prefix);
        self.with_retry("list", prefix, OperationClass::Metadata, || {
            self.backend.list_prefix(prefix)
        })
        .await
    }
}

pub fn normalize_key(key: &str) -> &str {
    key.trim().trim_start_matches('/')
}
