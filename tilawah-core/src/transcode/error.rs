use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStage {
    Low,
    Hls,
    Thumbnail,
    Blur,
}

impl TranscodeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscodeStage::Low => "low",
            TranscodeStage::Hls => "hls",
            TranscodeStage::Thumbnail => "thumbnail",
            TranscodeStage::Blur => "blur",
        }
    }
}

impl fmt::Display for TranscodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the external encoder. None of these are retried.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// Encoder exited non-zero; `diagnostics` holds its captured stderr.
    #[error("{stage} transcode failed (exit {status:?}): {diagnostics}")]
    ProcessFailed {
        stage: TranscodeStage,
        status: Option<i32>,
        diagnostics: String,
    },
    #[error("{stage} transcode could not start: executable {program} not found")]
    ExecutableNotFound {
        stage: TranscodeStage,
        program: String,
    },
    #[error("{stage} transcode produced no output at {path}")]
    MissingOutput { stage: TranscodeStage, path: PathBuf },
    #[error("{stage} transcode io error at {path}: {source}")]
    Io {
        stage: TranscodeStage,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("blur placeholder image error: {0}")]
    Image(String),
}

impl TranscodeError {
    pub fn stage(&self) -> TranscodeStage {
        match self {
            TranscodeError::ProcessFailed { stage, .. }
            | TranscodeError::ExecutableNotFound { stage, .. }
            | TranscodeError::MissingOutput { stage, .. }
            | TranscodeError::Io { stage, .. } => *stage,
            TranscodeError::Image(_) => TranscodeStage::Blur,
        }
    }
}

impl From<image::ImageError> for TranscodeError {
    fn from(source: image::ImageError) -> Self {
        TranscodeError::Image(source.to_string())
    }
}

pub type TranscodeResult<T> = std::result::Result<T, TranscodeError>;
