//! The seam between the coordinator and a connected member.
//!
//! The coordinator only needs to push single artifacts to live members
//! and to check that a member is still there; full bundles travel in the
//! join response. Implementations exist for
//! in-process members and for members reached over HTTP.

use async_trait::async_trait;
use thiserror::Error;

use crate::apply::ApplyFailure;
use crate::types::{ArtifactPayload, ArtifactRecord};

/// Why a push to a member did not succeed.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The member received the artifact but could not apply it.
    #[error("member rejected artifact: {0}")]
    Apply(#[from] ApplyFailure),

    /// The member could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("member did not acknowledge within {0:?}")]
    Timeout(std::time::Duration),
}

impl LinkError {
    /// Whether the member itself is likely gone, as opposed to having
    /// answered with a structured failure.
    pub fn is_unreachable(&self) -> bool {
        !matches!(self, LinkError::Apply(_))
    }
}

/// Push channel from the locator to one member.
#[async_trait]
pub trait MemberLink: Send + Sync {
    /// Install one artifact on the member and wait for its acknowledgment.
    async fn apply_artifact(&self, payload: ArtifactPayload) -> Result<ArtifactRecord, LinkError>;

    /// Check that the member still answers.
    async fn ping(&self) -> Result<(), LinkError>;

    /// Human-readable address for logs.
    fn describe(&self) -> String;
}
