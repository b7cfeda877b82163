//! Per-user drafting state for interactive front-ends.
//!
//! Front-ends collect clip metadata over several steps and may queue more
//! than one upload per user. Both pieces of state are passed into the
//! orchestrator explicitly instead of living in globals.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clip::{RawClipFields, RawClipInput};

use super::{IngestOptions, IngestReport, IngestRequest, IngestResult, Ingestor};

/// A value picked from a known list, or free text typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selection<T> {
    Known(T),
    Custom(String),
}

impl<T: AsRef<str>> Selection<T> {
    /// Plain string handed to the pipeline; custom text is trimmed.
    pub fn resolve(&self) -> String {
        match self {
            Selection::Known(value) => value.as_ref().to_string(),
            Selection::Custom(text) => text.trim().to_string(),
        }
    }
}

/// Metadata collected so far for one pending upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipDraft {
    pub surah: Option<u16>,
    pub ayah_start: Option<u32>,
    pub ayah_end: Option<u32>,
    pub reciter: Option<Selection<String>>,
    pub riwayah: Option<Selection<String>>,
    pub translation: Option<Selection<String>>,
}

impl ClipDraft {
    /// Missing bounds become zero so validation reports them by field.
    pub fn to_input(&self) -> RawClipInput {
        let fields = RawClipFields {
            surah: self.surah.map(i64::from).unwrap_or_default(),
            ayah_start: self.ayah_start.map(i64::from).unwrap_or_default(),
            ayah_end: self.ayah_end.map(i64::from).unwrap_or_default(),
            riwayah: self.riwayah.as_ref().map(Selection::resolve),
            translation: self.translation.as_ref().map(Selection::resolve),
            ..RawClipFields::default()
        };
        match &self.reciter {
            Some(Selection::Known(slug)) => RawClipInput::Current {
                fields,
                reciter_slug: Some(slug.clone()),
                reciter_name: None,
            },
            Some(custom @ Selection::Custom(_)) => RawClipInput::Legacy {
                fields,
                reciter: custom.resolve(),
            },
            None => RawClipInput::Legacy {
                fields,
                reciter: String::new(),
            },
        }
    }
}

/// Keyed session storage. Implementations must be safe to share between tasks.
pub trait SessionStore<S>: Send + Sync {
    fn get(&self, user: &str) -> Option<S>;
    fn put(&self, user: &str, session: S);
    fn remove(&self, user: &str) -> Option<S>;
}

#[derive(Debug)]
pub struct InMemorySessionStore<S> {
    sessions: Mutex<HashMap<String, S>>,
}

impl<S> Default for InMemorySessionStore<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> InMemorySessionStore<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, S>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: Clone + Send> SessionStore<S> for InMemorySessionStore<S> {
    fn get(&self, user: &str) -> Option<S> {
        self.lock().get(user).cloned()
    }

    fn put(&self, user: &str, session: S) {
        self.lock().insert(user.to_string(), session);
    }

    fn remove(&self, user: &str) -> Option<S> {
        self.lock().remove(user)
    }
}

/// One queued upload: the downloaded file plus its finished draft.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingItem {
    pub source: PathBuf,
    pub draft: ClipDraft,
    pub options: IngestOptions,
}

impl PendingItem {
    pub fn into_request(self) -> IngestRequest {
        IngestRequest::new(self.source, self.draft.to_input()).with_options(self.options)
    }
}

/// FIFO of pending items per user.
#[derive(Debug)]
pub struct PendingQueue<T> {
    queues: Mutex<HashMap<String, VecDeque<T>>>,
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<T>>> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, user: &str, item: T) {
        self.lock().entry(user.to_string()).or_default().push_back(item);
    }

    pub fn pop(&self, user: &str) -> Option<T> {
        let mut queues = self.lock();
        let queue = queues.get_mut(user)?;
        let item = queue.pop_front();
        if queue.is_empty() {
            queues.remove(user);
        }
        item
    }

    pub fn len(&self, user: &str) -> usize {
        self.lock().get(user).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, user: &str) -> bool {
        self.len(user) == 0
    }

    pub fn clear(&self, user: &str) -> usize {
        self.lock().remove(user).map(|q| q.len()).unwrap_or(0)
    }
}

/// Ingests a user's queued items one at a time, in arrival order.
/// A failed item does not stop the rest.
pub async fn drain_queue(
    ingestor: &Ingestor,
    queue: &PendingQueue<PendingItem>,
    user: &str,
) -> Vec<IngestResult<IngestReport>> {
    let mut results = Vec::new();
    while let Some(item) = queue.pop(user) {
        let request = item.into_request();
        results.push(ingestor.ingest(&request).await);
    }
    info!(user, processed = results.len(), "drained pending queue");
    results
}
