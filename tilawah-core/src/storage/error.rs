use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Network-class failures worth retrying, classified once at the backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientCause {
    Timeout,
    ConnectionReset,
    Dispatch,
    Throttled,
    ServerError(u16),
}

impl fmt::Display for TransientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientCause::Timeout => f.write_str("timeout"),
            TransientCause::ConnectionReset => f.write_str("connection reset"),
            TransientCause::Dispatch => f.write_str("dispatch failure"),
            TransientCause::Throttled => f.write_str("throttled"),
            TransientCause::ServerError(status) => write!(f, "server error {status}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{operation} {key}: transient {cause}: {message}")]
    Transient {
        operation: &'static str,
        key: String,
        cause: TransientCause,
        message: String,
    },
    #[error("object {key} not found")]
    NotFound { key: String },
    #[error("{operation} {key} failed (status {status:?}): {message}")]
    Permanent {
        operation: &'static str,
        key: String,
        status: Option<u16>,
        message: String,
    },
    #[error("{operation} {key} still failing after {attempts} attempts: {cause}")]
    RetriesExhausted {
        operation: &'static str,
        key: String,
        attempts: u32,
        cause: TransientCause,
    },
    #[error("refusing to overwrite {key}: stored digest {existing:?} differs from {incoming}")]
    Conflict {
        key: String,
        existing: Option<String>,
        incoming: String,
    },
    #[error("failed to delete {} of {requested} objects: {}", .failures.len(), summarize(.failures))]
    DeleteFailed {
        requested: usize,
        failures: Vec<DeleteFailure>,
    },
    #[error("local io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("storage backend not configured: {0}")]
    Configuration(String),
}

fn summarize(failures: &[DeleteFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.key, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl StorageError {
    pub fn transient_cause(&self) -> Option<TransientCause> {
        match self {
            StorageError::Transient { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
