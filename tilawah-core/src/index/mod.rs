mod build;
mod error;
mod jsonl;

pub use build::{
    build_index, read_index, validate_all, write_index, ClipIndex, IndexTables, SourceLine,
    INDEX_VERSION,
};
pub use error::{IndexError, IndexResult};
pub use jsonl::JsonlLog;
