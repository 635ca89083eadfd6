//! ConfigCoordinator: the locator's orchestration of joins, deploys,
//! imports and exports.
//!
//! Store mutations are serialized per record by [`ConfigStore`]; the
//! coordinator adds an epoch lock so that an import, which replaces the
//! whole tree, never interleaves with a join, deploy or export.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cfgsync_core::config::{LocatorConfig, parse_duration};
use cfgsync_core::{
    ApplyReport, ArtifactPayload, ArtifactRecord, CLUSTER_CONFIG_NAME, ConfigBundle, LinkError,
    MemberId, MemberLink, parse_groups,
};
use cfgsync_store::{ArtifactRegistry, ConfigStore, StoreResult};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::resolver::GroupResolver;
use crate::session::{MemberInfo, MemberSession, SessionState, generate_member_id};

/// Default bound on a member's acknowledgment of a pushed artifact.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

// ── Results ────────────────────────────────────────────────────────

/// What a joining member receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinResponse {
    pub member_id: MemberId,
    pub bundle: ConfigBundle,
}

/// One member that did not apply a pushed artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberFailure {
    pub member_id: MemberId,
    pub reason: String,
}

/// Outcome of a deploy that reached at least one connected member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployResult {
    pub artifact: ArtifactRecord,
    /// Members that acknowledged the artifact.
    pub affected_member_count: usize,
    pub failures: Vec<MemberFailure>,
}

/// Outcome of an import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportResult {
    /// Where the previous store was moved to.
    pub backup_dir: PathBuf,
    /// Record names in the imported store.
    pub records: Vec<String>,
}

// ── Coordinator ────────────────────────────────────────────────────

/// Locator-side owner of the configuration store and member sessions.
pub struct ConfigCoordinator {
    store: ConfigStore,
    registry: ArtifactRegistry,
    sessions: Mutex<HashMap<MemberId, MemberSession>>,
    /// Held exclusively by import, shared by everything else.
    epoch: RwLock<()>,
    ack_timeout: Duration,
}

impl ConfigCoordinator {
    pub fn new(store: ConfigStore) -> Self {
        Self {
            registry: ArtifactRegistry::new(store.clone()),
            store,
            sessions: Mutex::new(HashMap::new()),
            epoch: RwLock::new(()),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Build a coordinator from the locator section of `sync.toml`.
    ///
    /// With `load_cluster_configuration_from_dir` the existing store is
    /// loaded strictly and must already exist; otherwise a missing store is
    /// initialised empty.
    pub fn open(config: &LocatorConfig) -> CoordinatorResult<Self> {
        let ack_timeout = parse_duration(&config.member_ack_timeout).ok_or_else(|| {
            CoordinatorError::InvalidConfig(format!(
                "invalid member_ack_timeout {:?}",
                config.member_ack_timeout
            ))
        })?;

        let root = config.store_root();
        let store = if config.load_cluster_configuration_from_dir {
            if !root.is_dir() {
                return Err(CoordinatorError::InvalidConfig(format!(
                    "load_cluster_configuration_from_dir is set but {} does not exist",
                    root.display()
                )));
            }
            ConfigStore::load(&root)?
        } else {
            ConfigStore::open(&root)?
        };
        info!(
            ?root,
            records = store.list_names().len(),
            ?ack_timeout,
            "cluster configuration store ready"
        );
        Ok(Self::new(store).with_ack_timeout(ack_timeout))
    }

    /// Set the per-member acknowledgment timeout for deploy fan-out.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    // ── Membership ─────────────────────────────────────────────────

    /// Register a member declaring `groups` (comma-separated) and compute
    /// the bundle it must apply.
    ///
    /// The member's records are read under their record locks, so each
    /// record in the bundle is consistent with the artifact contents
    /// shipped alongside it.
    pub async fn on_member_join(
        &self,
        groups: &str,
        link: Arc<dyn MemberLink>,
    ) -> CoordinatorResult<JoinResponse> {
        let _epoch = self.epoch.read().await;

        let groups = parse_groups(groups);
        let endpoint = link.describe();
        let member_id = self.with_sessions(|sessions| {
            let mut member_id = generate_member_id(&endpoint);
            while sessions.contains_key(&member_id) {
                member_id = generate_member_id(&endpoint);
            }
            sessions.insert(
                member_id.clone(),
                MemberSession::new(member_id.clone(), groups.clone(), link),
            );
            member_id
        });
        info!(member = %member_id, %endpoint, ?groups, "member joining");

        let candidates = GroupResolver::candidate_records(&groups);
        let bundle = self.store.read_locked(&candidates, || -> StoreResult<ConfigBundle> {
            let resolved = GroupResolver::resolve(&self.store, &groups);
            let artifacts = self.registry.resolve_for_member(&resolved);
            let artifacts = self.registry.payloads(&artifacts)?;
            Ok(ConfigBundle { resolved, artifacts })
        });

        let bundle = match bundle {
            Ok(bundle) => bundle,
            Err(e) => {
                self.with_session(&member_id, |s| s.fail(format!("resolution failed: {e}")));
                return Err(e.into());
            }
        };

        self.with_session(&member_id, |s| s.advance(SessionState::ConfigSent));
        info!(
            member = %member_id,
            records = ?bundle.resolved.record_names(),
            artifacts = bundle.artifacts.len(),
            "configuration sent to member"
        );
        Ok(JoinResponse { member_id, bundle })
    }

    /// Record a member's report of applying its join bundle.
    pub fn on_member_ack(
        &self,
        member_id: &str,
        report: &ApplyReport,
    ) -> CoordinatorResult<SessionState> {
        self.with_session(member_id, |session| {
            if report.is_success() {
                session.advance(SessionState::Acked);
            } else {
                let reasons: Vec<String> = report.failures.iter().map(ToString::to_string).collect();
                session.fail(reasons.join("; "));
            }
            session.state
        })
        .ok_or_else(|| CoordinatorError::UnknownMember(member_id.to_string()))
    }

    /// Forget a member. Returns whether it was known.
    pub fn on_member_leave(&self, member_id: &str) -> bool {
        let removed = self.with_sessions(|sessions| sessions.remove(member_id));
        match removed {
            Some(session) => {
                info!(member = %member_id, state = %session.state, "member left");
                true
            }
            None => false,
        }
    }

    /// Snapshot of all sessions, sorted by id.
    pub fn members(&self) -> Vec<MemberInfo> {
        let mut members: Vec<MemberInfo> =
            self.with_sessions(|sessions| sessions.values().map(MemberSession::info).collect());
        members.sort_by(|a, b| a.id.cmp(&b.id));
        members
    }

    /// Number of sessions that are not `Failed`.
    pub fn active_member_count(&self) -> usize {
        self.with_sessions(|sessions| sessions.values().filter(|s| s.state.is_connected()).count())
    }

    // ── Deploy ─────────────────────────────────────────────────────

    /// Deploy `content` as `base_name` to `group` (or the cluster record)
    /// and push it to every connected member that receives that record.
    ///
    /// The store write happens first and is durable whatever the fan-out
    /// outcome. With nobody connected the result is
    /// [`CoordinatorError::NoMembersAvailable`], but the artifact stays
    /// recorded and later joiners receive it.
    pub async fn on_deploy(
        &self,
        group: Option<&str>,
        content: &[u8],
        base_name: &str,
    ) -> CoordinatorResult<DeployResult> {
        let _epoch = self.epoch.read().await;

        let record_name = group.unwrap_or(CLUSTER_CONFIG_NAME);
        let artifact = self.registry.deploy(record_name, content, base_name)?;

        let (connected, targets) = self.with_sessions(|sessions| {
            let connected = sessions.values().filter(|s| s.state.is_connected()).count();
            let targets: Vec<(MemberId, Arc<dyn MemberLink>)> = sessions
                .values()
                .filter(|s| s.state.receives_deploys() && s.includes(record_name))
                .map(|s| (s.id.clone(), s.link.clone()))
                .collect();
            (connected, targets)
        });

        if connected == 0 {
            warn!(
                record = %record_name,
                artifact = %artifact.stored_file_name(),
                "deploy recorded but no members are connected"
            );
            return Err(CoordinatorError::NoMembersAvailable { artifact });
        }

        let payload = ArtifactPayload {
            artifact: artifact.clone(),
            content: content.to_vec(),
        };
        let (affected_member_count, failures) = self.fan_out(payload, targets).await;

        info!(
            record = %record_name,
            artifact = %artifact.stored_file_name(),
            affected = affected_member_count,
            failed = failures.len(),
            "deploy completed"
        );
        Ok(DeployResult {
            artifact,
            affected_member_count,
            failures,
        })
    }

    /// Remove every version of `base_name` from `group` (or the cluster
    /// record). Connected members keep their loaded copy until they rejoin.
    pub async fn on_undeploy(
        &self,
        group: Option<&str>,
        base_name: &str,
    ) -> CoordinatorResult<Vec<ArtifactRecord>> {
        let _epoch = self.epoch.read().await;
        let record_name = group.unwrap_or(CLUSTER_CONFIG_NAME);
        Ok(self.registry.undeploy(record_name, base_name)?)
    }

    async fn fan_out(
        &self,
        payload: ArtifactPayload,
        targets: Vec<(MemberId, Arc<dyn MemberLink>)>,
    ) -> (usize, Vec<MemberFailure>) {
        let timeout = self.ack_timeout;
        let mut set = JoinSet::new();
        for (member_id, link) in targets {
            let payload = payload.clone();
            set.spawn(async move {
                debug!(member = %member_id, endpoint = %link.describe(), "pushing artifact");
                let outcome = match tokio::time::timeout(timeout, link.apply_artifact(payload)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LinkError::Timeout(timeout)),
                };
                (member_id, outcome)
            });
        }

        let mut affected = 0;
        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(_))) => affected += 1,
                Ok((member_id, Err(e))) => {
                    warn!(member = %member_id, error = %e, "member did not apply artifact");
                    if e.is_unreachable() {
                        self.with_session(&member_id, |s| s.fail(e.to_string()));
                    }
                    failures.push(MemberFailure {
                        member_id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => warn!(error = %e, "artifact push task aborted"),
            }
        }
        failures.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        (affected, failures)
    }

    /// Ping every connected member and fail the sessions of those that do
    /// not answer within the ack timeout. Returns how many were failed.
    pub async fn prune_unreachable_members(&self) -> usize {
        let timeout = self.ack_timeout;
        let targets: Vec<(MemberId, Arc<dyn MemberLink>)> = self.with_sessions(|sessions| {
            sessions
                .values()
                .filter(|s| s.state.is_connected())
                .map(|s| (s.id.clone(), s.link.clone()))
                .collect()
        });

        let mut set = JoinSet::new();
        for (member_id, link) in targets {
            set.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, link.ping()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LinkError::Timeout(timeout)),
                };
                (member_id, outcome)
            });
        }

        let mut pruned = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((member_id, Err(e))) => {
                    if self
                        .with_session(&member_id, |s| s.fail(format!("unreachable: {e}")))
                        .is_some()
                    {
                        pruned += 1;
                    }
                }
                Err(e) => warn!(error = %e, "member ping task aborted"),
            }
        }
        if pruned > 0 {
            info!(pruned, "failed sessions of unreachable members");
        }
        pruned
    }

    // ── Import / export ────────────────────────────────────────────

    /// Replace the whole store with the contents of `archive`.
    ///
    /// Rejected with [`CoordinatorError::Conflict`] while any member is
    /// connected. Members that no longer answer a ping are marked failed
    /// first, so a crashed member does not block import forever. The previous store is renamed to a timestamped sibling
    /// `cluster_config{timestamp}` and never deleted.
    pub async fn on_import(&self, archive: &[u8]) -> CoordinatorResult<ImportResult> {
        let _epoch = self.epoch.write().await;

        let mut active = self.active_member_count();
        if active > 0 {
            self.prune_unreachable_members().await;
            active = self.active_member_count();
        }
        if active > 0 {
            warn!(active, "import rejected while members are connected");
            return Err(CoordinatorError::Conflict { active });
        }

        let root = self.store.root().to_path_buf();
        let (parent, name) = split_root(&root);
        let stamp = chrono::Local::now().format("%Y%m%d%H%M%S%3f").to_string();

        let staging = unique_sibling(&parent, &format!(".{name}.import-{stamp}"));
        let records = cfgsync_archive::unpack(archive, &staging)?;
        if let Err(e) = ConfigStore::load(&staging) {
            remove_staging(&staging);
            return Err(e.into());
        }

        let backup_dir = unique_sibling(&parent, &format!("{name}{stamp}"));
        if let Err(source) = std::fs::rename(&root, &backup_dir) {
            remove_staging(&staging);
            return Err(CoordinatorError::Io { path: root, source });
        }
        if let Err(source) = std::fs::rename(&staging, &root) {
            if let Err(e) = std::fs::rename(&backup_dir, &root) {
                warn!(?backup_dir, error = %e, "failed to restore previous store");
            }
            remove_staging(&staging);
            return Err(CoordinatorError::Io { path: root, source });
        }

        self.store.reload()?;
        info!(?root, ?backup_dir, ?records, "cluster configuration imported");
        Ok(ImportResult {
            backup_dir,
            records,
        })
    }

    /// Zip the whole store. Every record is read-locked for the duration,
    /// so the archive never contains a half-applied deploy.
    pub async fn on_export(&self) -> CoordinatorResult<Vec<u8>> {
        let _epoch = self.epoch.read().await;
        let bytes = self
            .store
            .read_locked_all(|| cfgsync_archive::pack(self.store.root()))?;
        info!(size = bytes.len(), "cluster configuration exported");
        Ok(bytes)
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn with_sessions<T>(&self, f: impl FnOnce(&mut HashMap<MemberId, MemberSession>) -> T) -> T {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut sessions)
    }

    fn with_session<T>(&self, member_id: &str, f: impl FnOnce(&mut MemberSession) -> T) -> Option<T> {
        self.with_sessions(|sessions| sessions.get_mut(member_id).map(f))
    }
}

fn split_root(root: &Path) -> (PathBuf, String) {
    let parent = root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(cfgsync_core::config::CLUSTER_CONFIG_DIR_NAME)
        .to_string();
    (parent, name)
}

fn unique_sibling(parent: &Path, name: &str) -> PathBuf {
    let mut candidate = parent.join(name);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{name}_{n}"));
        n += 1;
    }
    candidate
}

fn remove_staging(staging: &Path) {
    if !staging.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(staging) {
        warn!(?staging, error = %e, "failed to remove import staging directory");
    }
}
