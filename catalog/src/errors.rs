use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::task::JoinError;

use crate::{extract, graph, DigestError};

/// Errors surfaced while cataloging archives.
///
/// `ExtractionFailed` and `CycleDetected` are recoverable: the processor
/// falls back to recording the offending bytes as a plain file. Everything
/// else aborts the enclosing operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to extract {path}: {reason}")]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("archive cycle detected at {0}")]
    CycleDetected(String),

    #[error("missing digest: {0}")]
    MissingDigest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),

    #[error("graph error: {0}")]
    Graph(#[from] graph::Error),

    #[error("internal storage error: {0}")]
    StorageError(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("archive controller is closed")]
    ControllerClosed,

    #[error("worker task failed: {0}")]
    WorkerPanicked(String),
}

impl Error {
    /// Attach the path an [std::io::Error] occurred at.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the processor may fall back to treating the bytes as a file.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ExtractionFailed { .. } | Error::CycleDetected(_)
        )
    }
}

impl From<extract::Error> for Error {
    fn from(value: extract::Error) -> Self {
        match value {
            extract::Error::NotAnArchive { path, reason } => {
                Error::ExtractionFailed { path, reason }
            }
            extract::Error::Io { path, source } => Error::Io { path, source },
        }
    }
}

impl From<JoinError> for Error {
    fn from(value: JoinError) -> Self {
        Error::WorkerPanicked(value.to_string())
    }
}
