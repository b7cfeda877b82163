//! In-process object store used by tests and local dry runs.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::hasher::digest_bytes;

use super::backend::{ObjectMetadata, ObjectStore, PutRequest};
use super::{DeleteFailure, StorageError, StorageResult, TransientCause};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub cache_control: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Head,
    Get,
    Put,
    Copy,
    Delete,
    List,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    faults: BTreeMap<Operation, VecDeque<TransientCause>>,
    calls: BTreeMap<Operation, usize>,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<State>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `count` calls of `operation` fail with `cause`.
    pub fn inject_faults(&self, operation: Operation, cause: TransientCause, count: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(operation).or_default();
        queue.extend(std::iter::repeat(cause).take(count));
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        let body = body.into();
        let mut metadata = BTreeMap::new();
        metadata.insert(super::MD5_METADATA_KEY.to_string(), digest_bytes(&body));
        self.insert_with_metadata(key, body, metadata);
    }

    pub fn insert_with_metadata(
        &self,
        key: impl Into<String>,
        body: impl Into<Vec<u8>>,
        metadata: BTreeMap<String, String>,
    ) {
        let key = key.into();
        let object = StoredObject {
            body: body.into(),
            content_type: crate::clip::content_type_for(&key).to_string(),
            cache_control: super::IMMUTABLE_CACHE_CONTROL.to_string(),
            metadata,
        };
        self.lock().objects.insert(key, object);
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    fn enter(&self, operation: Operation, key: &str) -> StorageResult<()> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        if let Some(cause) = state.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            return Err(StorageError::Transient {
                operation: operation_label(operation),
                key: key.to_string(),
                cause,
                message: "injected fault".into(),
            });
        }
        Ok(())
    }
}

fn operation_label(operation: Operation) -> &'static str {
    match operation {
        Operation::Head => "head",
        Operation::Get => "get",
        Operation::Put => "put",
        Operation::Copy => "copy",
        Operation::Delete => "delete",
        Operation::List => "list",
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head(&self, key: &str) -> StorageResult<Option<ObjectMetadata>> {
        self.enter(Operation::Head, key)?;
        Ok(self.lock().objects.get(key).map(|object| ObjectMetadata {
            size: object.body.len() as u64,
            content_type: Some(object.content_type.clone()),
            etag: Some(format!("\"{}\"", digest_bytes(&object.body))),
            metadata: object.metadata.clone(),
        }))
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> StorageResult<u64> {
        let body = self.get_bytes(key).await?;
        tokio::fs::write(dest, &body)
            .await
            .map_err(|source| StorageError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        Ok(body.len() as u64)
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.enter(Operation::Get, key)?;
        self.lock()
            .objects
            .get(key)
            .map(|object| object.body.clone())
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put_file(&self, key: &str, source: &Path, request: &PutRequest) -> StorageResult<()> {
        self.enter(Operation::Put, key)?;
        let body = tokio::fs::read(source)
            .await
            .map_err(|err| StorageError::Io {
                path: source.to_path_buf(),
                source: err,
            })?;
        let object = StoredObject {
            body,
            content_type: request.content_type.clone(),
            cache_control: request.cache_control.clone(),
            metadata: request.metadata.clone(),
        };
        self.lock().objects.insert(key.to_string(), object);
        Ok(())
    }

    async fn copy(&self, from_key: &str, to_key: &str) -> StorageResult<()> {
        self.enter(Operation::Copy, to_key)?;
        let mut state = self.lock();
        let object = state
            .objects
            .get(from_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: from_key.to_string(),
            })?;
        state.objects.insert(to_key.to_string(), object);
        Ok(())
    }

    async fn delete_batch(&self, keys: &[String]) -> StorageResult<Vec<DeleteFailure>> {
        let first = keys.first().map(String::as_str).unwrap_or_default();
        self.enter(Operation::Delete, first)?;
        let mut state = self.lock();
        for key in keys {
            state.objects.remove(key);
        }
        Ok(Vec::new())
    }

    async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.enter(Operation::List, prefix)?;
        Ok(self
            .lock()
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
