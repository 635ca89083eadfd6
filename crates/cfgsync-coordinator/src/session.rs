//! Member sessions: one per joined member, tracked by the locator.
//!
//! A session moves `Joining → ConfigSent → Acked`. Any state may fall to
//! `Failed`; a failed session stays failed until the member leaves or
//! joins again under a new id.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use cfgsync_core::{MemberId, MemberLink};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Lifecycle of a member session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Joining,
    ConfigSent,
    Acked,
    Failed,
}

impl SessionState {
    /// Whether a session may move from `self` to `next`.
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Joining, ConfigSent) | (ConfigSent, Acked) | (Joining | ConfigSent | Acked, Failed)
        )
    }

    /// Sessions in any state but `Failed` count as connected.
    pub fn is_connected(self) -> bool {
        self != SessionState::Failed
    }

    /// Sessions that already hold their configuration and receive deploys.
    pub fn receives_deploys(self) -> bool {
        matches!(self, SessionState::ConfigSent | SessionState::Acked)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Joining => "joining",
            SessionState::ConfigSent => "config_sent",
            SessionState::Acked => "acked",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A joined member, as seen by the locator.
pub struct MemberSession {
    pub id: MemberId,
    pub groups: BTreeSet<String>,
    pub state: SessionState,
    pub failure: Option<String>,
    pub joined_at: u64,
    pub(crate) link: Arc<dyn MemberLink>,
}

impl MemberSession {
    pub(crate) fn new(id: MemberId, groups: BTreeSet<String>, link: Arc<dyn MemberLink>) -> Self {
        Self {
            id,
            groups,
            state: SessionState::Joining,
            failure: None,
            joined_at: epoch_secs(),
            link,
        }
    }

    /// Move to `next`, ignoring transitions the state machine forbids.
    pub(crate) fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition(next) {
            warn!(member = %self.id, from = %self.state, to = %next, "ignoring invalid session transition");
            return false;
        }
        info!(member = %self.id, from = %self.state, to = %next, "member session transition");
        self.state = next;
        true
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.advance(SessionState::Failed) {
            warn!(member = %self.id, %reason, "member session failed");
            self.failure = Some(reason);
        }
    }

    /// Whether content of `record_name` reaches this member.
    pub fn includes(&self, record_name: &str) -> bool {
        record_name == cfgsync_core::CLUSTER_CONFIG_NAME || self.groups.contains(record_name)
    }

    pub fn info(&self) -> MemberInfo {
        MemberInfo {
            id: self.id.clone(),
            groups: self.groups.iter().cloned().collect(),
            state: self.state,
            failure: self.failure.clone(),
            joined_at: self.joined_at,
            endpoint: self.link.describe(),
        }
    }
}

/// Serializable snapshot of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: MemberId,
    pub groups: Vec<String>,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub joined_at: u64,
    pub endpoint: String,
}

static NEXT_MEMBER: AtomicU64 = AtomicU64::new(0);

/// Generate a member id: `member-` followed by 16 hex digits.
///
/// Callers still check the id against live sessions before use.
pub(crate) fn generate_member_id(endpoint: &str) -> MemberId {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    endpoint.hash(&mut hasher);
    NEXT_MEMBER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    epoch_secs().hash(&mut hasher);
    format!("member-{:016x}", hasher.finish())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
