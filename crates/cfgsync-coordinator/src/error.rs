//! Error types for the coordinator.

use std::path::PathBuf;

use cfgsync_archive::ArchiveError;
use cfgsync_core::ArtifactRecord;
use cfgsync_store::StoreError;
use thiserror::Error;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Import attempted while members are connected.
    #[error("cannot import cluster configuration while {active} member(s) are connected")]
    Conflict { active: usize },

    /// Deploy recorded, but nobody was connected to receive it.
    #[error("no members available to receive {}; the artifact was recorded for members that join later", .artifact.stored_file_name())]
    NoMembersAvailable { artifact: ArtifactRecord },

    #[error("invalid locator configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown member: {0}")]
    UnknownMember(String),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
