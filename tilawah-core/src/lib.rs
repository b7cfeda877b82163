pub mod clip;
pub mod config;
pub mod error;
pub mod hasher;
pub mod index;
pub mod ingest;
pub mod repair;
pub mod sqlite;
pub mod storage;
pub mod store;
pub mod transcode;

pub use clip::{
    normalize, Catalog, Clip, ClipCoordinates, ClipRecord, ClipVariant, MediaKind, Quality,
    RawClipInput, ValidationError, VariantKey,
};
pub use config::{load_tilawah_config, TilawahConfig};
pub use error::{ConfigError, Result};
pub use hasher::{digest_bytes, digest_file, HashError};
pub use index::{build_index, write_index, ClipIndex, IndexError, JsonlLog, SourceLine};
pub use ingest::{
    IngestError, IngestOptions, IngestOutcome, IngestReport, IngestRequest, IngestState,
    Ingestor,
};
pub use repair::{BatchSummary, RepairContext, RepairError, RepairMode};
pub use storage::{
    InMemoryObjectStore, ObjectStore, PublicUrlResolver, RetryPolicy, S3ObjectStore,
    StorageClient, StorageError,
};
pub use store::{
    ClipFilter, ClipRepository, ClipStoreError, RecordChange, SqliteClipStore,
    SqliteClipStoreBuilder,
};
pub use transcode::{TranscodeError, Transcoder};
