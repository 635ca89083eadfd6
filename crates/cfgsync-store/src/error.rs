//! Error types for the cfgsync configuration store.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt record {record}: {reason}")]
    CorruptRecord { record: String, reason: String },

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("record directory {0:?} claims to be the cluster record")]
    DuplicateClusterRecord(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl StoreError {
    pub(crate) fn corrupt(record: &str, reason: impl Into<String>) -> Self {
        StoreError::CorruptRecord {
            record: record.to_string(),
            reason: reason.into(),
        }
    }
}

/// Build a closure that wraps an `io::Error` with the path it concerns.
pub(crate) fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
