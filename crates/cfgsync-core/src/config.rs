//! sync.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the locator's configuration dir holding the store.
pub const CLUSTER_CONFIG_DIR_NAME: &str = "cluster_config";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub locator: LocatorConfig,
    pub member: MemberConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocatorConfig {
    /// Serve cluster configuration to joining members.
    pub enable_cluster_configuration: bool,
    /// Parent of the `cluster_config` store directory.
    pub cluster_configuration_dir: PathBuf,
    /// Load the store from `cluster_configuration_dir` before accepting joins.
    pub load_cluster_configuration_from_dir: bool,
    /// How long a member may take to acknowledge a pushed artifact.
    pub member_ack_timeout: String,
    pub port: u16,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            enable_cluster_configuration: true,
            cluster_configuration_dir: PathBuf::from("."),
            load_cluster_configuration_from_dir: false,
            member_ack_timeout: "10s".to_string(),
            port: 7070,
        }
    }
}

impl LocatorConfig {
    /// Canonical store path.
    pub fn store_root(&self) -> PathBuf {
        self.cluster_configuration_dir.join(CLUSTER_CONFIG_DIR_NAME)
    }

    pub fn ack_timeout(&self) -> anyhow::Result<Duration> {
        parse_duration(&self.member_ack_timeout)
            .ok_or_else(|| anyhow::anyhow!("invalid member_ack_timeout: {:?}", self.member_ack_timeout))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemberConfig {
    /// Request configuration from the locator on startup.
    pub use_cluster_configuration: bool,
    /// Comma-separated group list.
    pub groups: String,
    /// Base URL of the locator API.
    pub locator: String,
    /// Where installed artifacts live.
    pub work_dir: PathBuf,
    pub port: u16,
    /// Address the locator uses to push artifacts back to this member.
    pub advertise_address: String,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            use_cluster_configuration: true,
            groups: String::new(),
            locator: "http://127.0.0.1:7070".to_string(),
            work_dir: PathBuf::from("."),
            port: 7071,
            advertise_address: "127.0.0.1".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        None
    }
}
