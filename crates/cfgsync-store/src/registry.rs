//! ArtifactRegistry: versioned code artifacts per configuration record.
//!
//! Every deploy writes a new immutable `{base}#{version}` file; the version
//! is one above the highest version of that base name the record holds, so
//! redeploying identical bytes still produces a new version. A redeploy
//! supersedes the previous version in the record's active sequence.

use std::path::Path;

use cfgsync_core::{
    ArtifactPayload, ArtifactRecord, CLUSTER_CONFIG_NAME, ResolvedConfiguration, sha256_hex,
};
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult, io_at};
use crate::layout::{record_dir, validate_artifact_name, write_atomic};
use crate::store::ConfigStore;

/// Deploy/undeploy/lookup of artifacts, layered on a [`ConfigStore`].
#[derive(Clone)]
pub struct ArtifactRegistry {
    store: ConfigStore,
}

impl ArtifactRegistry {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Deploy `content` as the next version of `base_name` in `record_name`.
    ///
    /// The record is created if it does not exist yet. The artifact file is
    /// flushed to disk before the record referencing it is published.
    pub fn deploy(
        &self,
        record_name: &str,
        content: &[u8],
        base_name: &str,
    ) -> StoreResult<ArtifactRecord> {
        validate_artifact_name(record_name, base_name)?;

        let mut written = None;
        let result = self.store.update(record_name, |record, dir| {
            let artifact = ArtifactRecord {
                record_name: record_name.to_string(),
                base_name: base_name.to_string(),
                version: record.latest_version(base_name) + 1,
                sha256: sha256_hex(content),
                size_bytes: content.len() as u64,
            };
            write_atomic(dir, &artifact.stored_file_name(), content)?;
            written = Some(dir.join(artifact.stored_file_name()));

            let superseded: Vec<ArtifactRecord> = record
                .artifacts
                .iter()
                .filter(|a| a.base_name == base_name)
                .cloned()
                .collect();
            record.artifacts.retain(|a| a.base_name != base_name);
            record.artifacts.push(artifact.clone());
            Ok((artifact, superseded))
        });

        let (artifact, superseded) = match result {
            Ok((_, value)) => value,
            Err(e) => {
                if let Some(path) = written {
                    let _ = std::fs::remove_file(path);
                }
                return Err(e);
            }
        };

        let dir = record_dir(self.store.root(), record_name);
        for old in &superseded {
            remove_artifact_file(&dir, old);
        }

        info!(
            record = %record_name,
            artifact = %artifact.stored_file_name(),
            size = artifact.size_bytes,
            "artifact deployed"
        );
        Ok(artifact)
    }

    /// Remove every version of `base_name` from `record_name`.
    ///
    /// Returns the removed artifacts (empty if none matched).
    pub fn undeploy(&self, record_name: &str, base_name: &str) -> StoreResult<Vec<ArtifactRecord>> {
        let (_, removed) = self.store.update_existing(record_name, |record, _| {
            let removed: Vec<ArtifactRecord> = record
                .artifacts
                .iter()
                .filter(|a| a.base_name == base_name)
                .cloned()
                .collect();
            record.artifacts.retain(|a| a.base_name != base_name);
            Ok(removed)
        })?;

        let dir = record_dir(self.store.root(), record_name);
        for artifact in &removed {
            remove_artifact_file(&dir, artifact);
        }
        if !removed.is_empty() {
            info!(record = %record_name, %base_name, count = removed.len(), "artifact undeployed");
        }
        Ok(removed)
    }

    /// Artifacts currently held by `record_name`, in deployment order.
    pub fn list(&self, record_name: &str) -> Vec<ArtifactRecord> {
        self.store
            .get(record_name)
            .map(|r| r.artifacts.clone())
            .unwrap_or_default()
    }

    /// All artifacts a member with this resolution receives: cluster first,
    /// then each group record in resolution order. Artifacts with the same
    /// base name in different records are all included.
    pub fn resolve_for_member(&self, resolved: &ResolvedConfiguration) -> Vec<ArtifactRecord> {
        let (cluster, groups): (Vec<_>, Vec<_>) = resolved
            .records
            .iter()
            .partition(|r| r.name == CLUSTER_CONFIG_NAME);
        cluster
            .into_iter()
            .chain(groups)
            .flat_map(|r| r.artifacts.iter().cloned())
            .collect()
    }

    /// Highest loaded version of `base_name`, if any.
    pub fn find_by_base_name<'a>(
        loaded: &'a [ArtifactRecord],
        base_name: &str,
    ) -> Option<&'a ArtifactRecord> {
        cfgsync_core::find_by_base_name(loaded, base_name)
    }

    /// Read an artifact's content, verifying it against its digest.
    pub fn read(&self, artifact: &ArtifactRecord) -> StoreResult<Vec<u8>> {
        let path = record_dir(self.store.root(), &artifact.record_name).join(artifact.stored_file_name());
        let content = std::fs::read(&path).map_err(io_at(&path))?;
        if !artifact.matches_content(&content) {
            return Err(StoreError::CorruptRecord {
                record: artifact.record_name.clone(),
                reason: format!("artifact {} does not match its digest", artifact.stored_file_name()),
            });
        }
        Ok(content)
    }

    /// Read the contents of `artifacts` for shipping to a member.
    pub fn payloads(&self, artifacts: &[ArtifactRecord]) -> StoreResult<Vec<ArtifactPayload>> {
        artifacts
            .iter()
            .map(|a| {
                Ok(ArtifactPayload {
                    artifact: a.clone(),
                    content: self.read(a)?,
                })
            })
            .collect()
    }
}

fn remove_artifact_file(dir: &Path, artifact: &ArtifactRecord) {
    let path = dir.join(artifact.stored_file_name());
    if let Err(e) = std::fs::remove_file(&path) {
        warn!(?path, error = %e, "failed to remove artifact file");
    }
}
