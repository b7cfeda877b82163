mod error;
mod repository;
mod sqlite;

pub use error::{ClipStoreError, ClipStoreResult};
pub use repository::{ClipRepository, RecordChange, RepositoryError, RepositoryResult};
pub use sqlite::{ClipFilter, DistinctField, SqliteClipStore, SqliteClipStoreBuilder};
