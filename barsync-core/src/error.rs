//! Fatal, run-level errors.
//!
//! Per-ticker problems never surface here; they are recorded as soft failures
//! in the run report. A `SyncError` means the requested mode could not run.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{what} not found at {}", path.display())]
    SourceMissing { what: &'static str, path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("store {} is missing required column '{column}'", path.display())]
    StoreSchema { path: PathBuf, column: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}
