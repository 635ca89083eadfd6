//! Domain types shared by the locator and its members.
//!
//! Records are what the store persists; resolved configurations and
//! bundles are derived per member and travel over the wire as JSON.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the cluster-wide configuration record.
pub const CLUSTER_CONFIG_NAME: &str = "cluster";

/// Separator between an artifact's base name and its version.
pub const VERSION_SEPARATOR: char = '#';

/// Identifier assigned to a member session by the coordinator.
pub type MemberId = String;

// ── Records ────────────────────────────────────────────────────────

/// A region declared by a configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub name: String,
    /// Region shortcut, e.g. `REPLICATE` or `PARTITION`.
    pub refid: String,
}

impl RegionDescriptor {
    pub fn new(name: &str, refid: &str) -> Self {
        Self {
            name: name.to_string(),
            refid: refid.to_string(),
        }
    }
}

/// A deployed code artifact, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// Record (cluster or group) that owns this artifact.
    pub record_name: String,
    /// Logical artifact name, e.g. `cluster.jar`.
    pub base_name: String,
    pub version: u32,
    /// Hex SHA-256 of the artifact content.
    pub sha256: String,
    pub size_bytes: u64,
}

impl ArtifactRecord {
    /// `{base_name}#{version}`: the on-disk name and the artifact's identity.
    pub fn stored_file_name(&self) -> String {
        stored_file_name(&self.base_name, self.version)
    }

    /// Check that `content` is what this record describes.
    pub fn matches_content(&self, content: &[u8]) -> bool {
        content.len() as u64 == self.size_bytes && sha256_hex(content) == self.sha256
    }
}

/// Configuration scoped to the whole cluster or to one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationRecord {
    pub name: String,
    pub properties: BTreeMap<String, String>,
    pub regions: Vec<RegionDescriptor>,
    /// Deployment order.
    pub artifacts: Vec<ArtifactRecord>,
}

impl ConfigurationRecord {
    /// An empty record.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_cluster(&self) -> bool {
        self.name == CLUSTER_CONFIG_NAME
    }

    pub fn set_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
    }

    /// Declare a region. Re-declaring a name replaces its descriptor.
    pub fn add_region(&mut self, region: RegionDescriptor) {
        match self.regions.iter_mut().find(|r| r.name == region.name) {
            Some(existing) => *existing = region,
            None => self.regions.push(region),
        }
    }

    pub fn region(&self, name: &str) -> Option<&RegionDescriptor> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Highest version of `base_name` currently held by this record (0 if none).
    pub fn latest_version(&self, base_name: &str) -> u32 {
        self.artifacts
            .iter()
            .filter(|a| a.base_name == base_name)
            .map(|a| a.version)
            .max()
            .unwrap_or(0)
    }
}

// ── Resolution ─────────────────────────────────────────────────────

/// The records that apply to one member, in precedence order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedConfiguration {
    /// Groups the member declared, sorted.
    pub groups: Vec<String>,
    /// Cluster record first, then existing group records sorted by name.
    pub records: Vec<ConfigurationRecord>,
}

impl ResolvedConfiguration {
    /// Merge properties: later records overwrite earlier ones.
    pub fn effective_properties(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for record in &self.records {
            for (k, v) in &record.properties {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    pub fn record_names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    /// Whether a member with this resolution receives content of `record_name`.
    pub fn includes(&self, record_name: &str) -> bool {
        record_name == CLUSTER_CONFIG_NAME || self.groups.iter().any(|g| g == record_name)
    }
}

/// Artifact metadata together with its content, as pushed to members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactPayload {
    pub artifact: ArtifactRecord,
    #[serde(with = "hex::serde")]
    pub content: Vec<u8>,
}

/// Everything a joining member needs to apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigBundle {
    pub resolved: ResolvedConfiguration,
    pub artifacts: Vec<ArtifactPayload>,
}

// ── Helpers ────────────────────────────────────────────────────────

pub fn stored_file_name(base_name: &str, version: u32) -> String {
    format!("{base_name}{VERSION_SEPARATOR}{version}")
}

/// Split `{base}#{version}` into its parts.
///
/// Returns `None` for names without a numeric version suffix.
pub fn parse_stored_file_name(file_name: &str) -> Option<(&str, u32)> {
    let (base, version) = file_name.rsplit_once(VERSION_SEPARATOR)?;
    if base.is_empty() {
        return None;
    }
    let version = version.parse::<u32>().ok().filter(|v| *v > 0)?;
    Some((base, version))
}

/// Parse a member's comma-separated group list.
///
/// Names are case-sensitive; whitespace is trimmed and empty entries dropped.
pub fn parse_groups(groups: &str) -> BTreeSet<String> {
    groups
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect()
}

/// Hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Highest-version artifact named `base_name` among `loaded`.
pub fn find_by_base_name<'a>(
    loaded: &'a [ArtifactRecord],
    base_name: &str,
) -> Option<&'a ArtifactRecord> {
    loaded
        .iter()
        .filter(|a| a.base_name == base_name)
        .max_by_key(|a| a.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(record: &str, base: &str, version: u32) -> ArtifactRecord {
        ArtifactRecord {
            record_name: record.to_string(),
            base_name: base.to_string(),
            version,
            sha256: sha256_hex(b""),
            size_bytes: 0,
        }
    }

    #[test]
    fn stored_file_name_format() {
        assert_eq!(artifact("cluster", "cluster.jar", 1).stored_file_name(), "cluster.jar#1");
        assert_eq!(parse_stored_file_name("cluster.jar#12"), Some(("cluster.jar", 12)));
        assert_eq!(parse_stored_file_name("a#b.jar#3"), Some(("a#b.jar", 3)));
        assert_eq!(parse_stored_file_name("cluster.jar"), None);
        assert_eq!(parse_stored_file_name("cluster.jar#0"), None);
        assert_eq!(parse_stored_file_name("#4"), None);
    }

    #[test]
    fn parse_groups_trims_and_dedups() {
        let groups = parse_groups(" group2,group1,,group2 ");
        assert_eq!(groups.into_iter().collect::<Vec<_>>(), vec!["group1", "group2"]);
        assert!(parse_groups("").is_empty());
        assert_eq!(parse_groups("Group1,group1").len(), 2);
    }

    #[test]
    fn last_record_wins_property_conflicts() {
        let mut cluster = ConfigurationRecord::new(CLUSTER_CONFIG_NAME);
        cluster.set_property("log-file-size-limit", "5000");
        cluster.set_property("statistic-sampling-enabled", "true");
        let mut group1 = ConfigurationRecord::new("group1");
        group1.set_property("log-file-size-limit", "6000");
        let mut group2 = ConfigurationRecord::new("group2");
        group2.set_property("log-file-size-limit", "7000");

        let resolved = ResolvedConfiguration {
            groups: vec!["group1".into(), "group2".into()],
            records: vec![cluster, group1, group2],
        };
        let props = resolved.effective_properties();
        assert_eq!(props["log-file-size-limit"], "7000");
        assert_eq!(props["statistic-sampling-enabled"], "true");
    }

    #[test]
    fn add_region_replaces_same_name() {
        let mut record = ConfigurationRecord::new("group1");
        record.add_region(RegionDescriptor::new("orders", "REPLICATE"));
        record.add_region(RegionDescriptor::new("orders", "PARTITION"));
        assert_eq!(record.regions.len(), 1);
        assert_eq!(record.region("orders").unwrap().refid, "PARTITION");
    }

    #[test]
    fn find_by_base_name_prefers_latest() {
        let loaded = vec![
            artifact("cluster", "cluster.jar", 1),
            artifact("group1", "group1.jar", 1),
            artifact("cluster", "cluster.jar", 3),
        ];
        assert_eq!(find_by_base_name(&loaded, "cluster.jar").unwrap().version, 3);
        assert!(find_by_base_name(&loaded, "missing.jar").is_none());
    }

    #[test]
    fn payload_content_is_hex_in_json() {
        let payload = ArtifactPayload {
            artifact: artifact("cluster", "cluster.jar", 1),
            content: vec![0xca, 0xfe],
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"cafe\""));
        let back: ArtifactPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn resolved_includes_cluster_and_declared_groups() {
        let resolved = ResolvedConfiguration {
            groups: vec!["group1".into()],
            records: vec![ConfigurationRecord::new(CLUSTER_CONFIG_NAME)],
        };
        assert!(resolved.includes("cluster"));
        assert!(resolved.includes("group1"));
        assert!(!resolved.includes("group2"));
    }
}
