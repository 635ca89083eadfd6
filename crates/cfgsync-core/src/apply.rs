//! Member-side apply outcomes, reported back to the locator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structured failure while applying configuration on a member.
///
/// The member stays operational; the failure is reported, not raised.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyFailure {
    #[error("region {region} already exists as {existing}, cannot redeclare as {requested}")]
    RegionConflict {
        region: String,
        existing: String,
        requested: String,
    },

    #[error("artifact {artifact} is corrupt: {reason}")]
    CorruptArtifact { artifact: String, reason: String },

    #[error("failed to install artifact {artifact}: {reason}")]
    Install { artifact: String, reason: String },
}

/// Summary of applying a configuration bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyReport {
    /// Regions newly created by this apply (already-present ones are skipped).
    pub regions_created: Vec<String>,
    /// Number of effective properties after the merge.
    pub properties_applied: usize,
    /// Stored file names of artifacts installed.
    pub artifacts_installed: Vec<String>,
    pub failures: Vec<ApplyFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}
