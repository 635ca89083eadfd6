//! MemberAgent: applies resolved configuration on one member.
//!
//! The agent keeps the member's runtime view: declared regions, merged
//! properties, and the loaded units created from installed artifacts.
//! Installed artifacts live in `{work_dir}/{record}/cfgsync#{base}#{version}`;
//! the prefix marks them as locator-managed so that a restart can clear
//! them without touching files an operator placed by hand.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use cfgsync_core::{
    ApplyFailure, ApplyReport, ArtifactPayload, ArtifactRecord, ConfigBundle, RegionDescriptor,
    parse_groups,
};
use tracing::{debug, info, warn};

use crate::error::{MemberResult, io_at};

/// Prefix of every artifact file the agent installs.
///
/// Installed files live at `{work_dir}/{record}/cfgsync#{base_name}#{version}`,
/// one directory per record, so the same base name deployed to the
/// cluster and to a group installs as two separate files.
pub const INSTALLED_PREFIX: &str = "cfgsync#";

/// An installed artifact, usable by the member's code loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedUnit {
    pub artifact: ArtifactRecord,
    pub path: PathBuf,
}

#[derive(Default)]
struct Runtime {
    regions: BTreeMap<String, RegionDescriptor>,
    properties: BTreeMap<String, String>,
    /// Keyed by (record, base name): one loaded version per logical artifact.
    units: BTreeMap<(String, String), LoadedUnit>,
}

pub struct MemberAgent {
    work_dir: PathBuf,
    groups: BTreeSet<String>,
    runtime: RwLock<Runtime>,
}

impl MemberAgent {
    /// Open an agent rooted at `work_dir`, declaring `groups`
    /// (comma-separated).
    ///
    /// Locator-managed files left by a previous run are removed: the
    /// member receives a complete bundle again when it joins.
    pub fn open(work_dir: &Path, groups: &str) -> MemberResult<Self> {
        std::fs::create_dir_all(work_dir).map_err(io_at(work_dir))?;
        let removed = remove_stale_installs(work_dir)?;
        if removed > 0 {
            info!(?work_dir, removed, "removed stale locator-managed artifacts");
        }
        Ok(Self {
            work_dir: work_dir.to_path_buf(),
            groups: parse_groups(groups),
            runtime: RwLock::new(Runtime::default()),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Declared groups in the comma-separated form the join protocol uses.
    pub fn groups(&self) -> String {
        self.groups.iter().cloned().collect::<Vec<_>>().join(",")
    }

    // ── Apply ──────────────────────────────────────────────────────

    /// Apply a join bundle: regions, merged properties, then artifacts.
    ///
    /// Failures are collected into the report; applying continues with
    /// the remaining items.
    pub fn apply_resolved_configuration(&self, bundle: &ConfigBundle) -> ApplyReport {
        let mut report = ApplyReport::default();

        {
            let mut runtime = self.runtime_mut();
            for record in &bundle.resolved.records {
                for region in &record.regions {
                    let existing = runtime.regions.get(&region.name).map(|r| r.refid.clone());
                    match existing {
                        Some(existing) if existing == region.refid => {
                            debug!(region = %region.name, "region already declared");
                        }
                        Some(existing) => {
                            report.failures.push(ApplyFailure::RegionConflict {
                                region: region.name.clone(),
                                existing,
                                requested: region.refid.clone(),
                            });
                        }
                        None => {
                            runtime.regions.insert(region.name.clone(), region.clone());
                            report.regions_created.push(region.name.clone());
                        }
                    }
                }
            }

            let effective = bundle.resolved.effective_properties();
            report.properties_applied = effective.len();
            runtime.properties.extend(effective);
        }

        for payload in &bundle.artifacts {
            match self.apply_artifact(payload.clone()) {
                Ok(artifact) => report.artifacts_installed.push(artifact.stored_file_name()),
                Err(failure) => report.failures.push(failure),
            }
        }

        info!(
            regions = report.regions_created.len(),
            properties = report.properties_applied,
            artifacts = report.artifacts_installed.len(),
            failures = report.failures.len(),
            "resolved configuration applied"
        );
        for failure in &report.failures {
            warn!(%failure, "apply failure");
        }
        report
    }

    /// Install a single artifact and register it as a loaded unit.
    ///
    /// The artifact is usable iff this returns `Ok`. A newer version of
    /// the same base name in the same record replaces the loaded one; an
    /// older version than the one loaded is ignored and the loaded record
    /// is returned.
    pub fn apply_artifact(&self, payload: ArtifactPayload) -> Result<ArtifactRecord, ApplyFailure> {
        let artifact = payload.artifact;
        let stored = artifact.stored_file_name();

        if !artifact.matches_content(&payload.content) {
            return Err(ApplyFailure::CorruptArtifact {
                artifact: stored,
                reason: format!(
                    "expected {} bytes with sha256 {}, received {} bytes",
                    artifact.size_bytes,
                    artifact.sha256,
                    payload.content.len()
                ),
            });
        }
        if !is_safe_segment(&artifact.record_name) || !is_safe_segment(&artifact.base_name) {
            return Err(ApplyFailure::Install {
                artifact: stored,
                reason: "unsafe record or artifact name".to_string(),
            });
        }

        let key = (artifact.record_name.clone(), artifact.base_name.clone());
        let current = self.loaded_at_least(&key, artifact.version);
        if let Some(loaded) = current {
            debug!(artifact = %stored, loaded = loaded.artifact.version, "artifact already loaded");
            return Ok(loaded.artifact);
        }

        let dir = self.work_dir.join(&artifact.record_name);
        let path = install_file(&dir, &format!("{INSTALLED_PREFIX}{stored}"), &payload.content)
            .map_err(|e| ApplyFailure::Install {
                artifact: stored.clone(),
                reason: e.to_string(),
            })?;

        let mut runtime = self.runtime_mut();
        // A concurrent push may have installed a newer version while we wrote.
        let raced = runtime
            .units
            .get(&key)
            .filter(|loaded| loaded.artifact.version >= artifact.version)
            .cloned();
        if let Some(loaded) = raced {
            if loaded.path != path {
                remove_file(&path);
            }
            return Ok(loaded.artifact);
        }
        let previous = runtime.units.insert(
            key,
            LoadedUnit {
                artifact: artifact.clone(),
                path: path.clone(),
            },
        );
        drop(runtime);

        if let Some(previous) = previous {
            remove_file(&previous.path);
            info!(
                artifact = %stored,
                replaced = %previous.artifact.stored_file_name(),
                "artifact replaced"
            );
        } else {
            info!(artifact = %stored, record = %artifact.record_name, "artifact installed");
        }
        Ok(artifact)
    }

    // ── Lookup ─────────────────────────────────────────────────────

    /// Highest loaded version of `base_name` across all records.
    pub fn find_loaded(&self, base_name: &str) -> Option<ArtifactRecord> {
        let loaded = self.loaded_artifacts();
        cfgsync_core::find_by_base_name(&loaded, base_name).cloned()
    }

    pub fn loaded_unit(&self, record_name: &str, base_name: &str) -> Option<LoadedUnit> {
        self.runtime()
            .units
            .get(&(record_name.to_string(), base_name.to_string()))
            .cloned()
    }

    /// Loaded artifacts, ordered by record then base name.
    pub fn loaded_artifacts(&self) -> Vec<ArtifactRecord> {
        self.runtime().units.values().map(|u| u.artifact.clone()).collect()
    }

    pub fn region(&self, name: &str) -> Option<RegionDescriptor> {
        self.runtime().regions.get(name).cloned()
    }

    pub fn regions(&self) -> Vec<RegionDescriptor> {
        self.runtime().regions.values().cloned().collect()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.runtime().properties.get(key).cloned()
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.runtime().properties.clone()
    }

    /// Paths of installed artifact files, sorted.
    pub fn installed_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.runtime().units.values().map(|u| u.path.clone()).collect();
        files.sort();
        files
    }

    fn loaded_at_least(&self, key: &(String, String), version: u32) -> Option<LoadedUnit> {
        self.runtime()
            .units
            .get(key)
            .filter(|loaded| loaded.artifact.version >= version)
            .cloned()
    }

    fn runtime(&self) -> std::sync::RwLockReadGuard<'_, Runtime> {
        self.runtime.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn runtime_mut(&self) -> std::sync::RwLockWriteGuard<'_, Runtime> {
        self.runtime.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_safe_segment(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
}

/// Write `content` to `dir/file_name` through a flushed temp file, so the
/// final name only ever refers to a complete file.
fn install_file(dir: &Path, file_name: &str, content: &[u8]) -> MemberResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(io_at(dir))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_at(dir))?;
    tmp.write_all(content).map_err(io_at(tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_at(dir))?;

    let path = dir.join(file_name);
    tmp.persist(&path).map_err(|e| crate::error::MemberError::Io {
        path: path.clone(),
        source: e.error,
    })?;
    Ok(path)
}

fn remove_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(?path, error = %e, "failed to remove artifact file");
    }
}

/// Remove `cfgsync#` files in `work_dir` and its record subdirectories.
fn remove_stale_installs(work_dir: &Path) -> MemberResult<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(work_dir).map_err(io_at(work_dir))? {
        let entry = entry.map_err(io_at(work_dir))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(io_at(&path))?;
        if !file_type.is_dir() {
            continue;
        }
        for inner in std::fs::read_dir(&path).map_err(io_at(&path))? {
            let inner = inner.map_err(io_at(&path))?;
            let is_managed = inner
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(INSTALLED_PREFIX));
            if is_managed && inner.file_type().map_err(io_at(&path))?.is_file() {
                std::fs::remove_file(inner.path()).map_err(io_at(&inner.path()))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
