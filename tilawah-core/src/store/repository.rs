use std::path::PathBuf;

use thiserror::Error;

use crate::clip::ClipRecord;
use crate::index::IndexError;

use super::{ClipFilter, ClipStoreError, SqliteClipStore};

/// A pending change to the authoritative clip source.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    Upsert(ClipRecord),
    Replace { old_id: String, record: ClipRecord },
    Remove { id: String },
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] ClipStoreError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Read-modify-write access to whichever source holds the clips: the
/// SQLite store or a legacy JSON-Lines log.
pub trait ClipRepository: Send + Sync {
    fn describe(&self) -> String;

    /// Records in the source's stable order.
    fn load_all(&self) -> RepositoryResult<Vec<ClipRecord>>;

    /// Applies every change or none of them.
    fn apply(&mut self, changes: &[RecordChange]) -> RepositoryResult<()>;

    /// Timestamped copy of the source, taken before the first applied change.
    fn backup(&mut self) -> RepositoryResult<PathBuf>;
}

impl ClipRepository for SqliteClipStore {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path().display())
    }

    fn load_all(&self) -> RepositoryResult<Vec<ClipRecord>> {
        Ok(self.list_records(&ClipFilter::default())?)
    }

    fn apply(&mut self, changes: &[RecordChange]) -> RepositoryResult<()> {
        Ok(self.apply_changes(changes)?)
    }

    fn backup(&mut self) -> RepositoryResult<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let file_name = self
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clips.sqlite".into());
        let destination = self.path().with_file_name(format!("{file_name}.{stamp}.bak"));
        self.backup_to(&destination)?;
        Ok(destination)
    }
}
