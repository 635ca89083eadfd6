//! Group resolution: which records a member receives.

use std::collections::BTreeSet;

use cfgsync_core::{CLUSTER_CONFIG_NAME, ResolvedConfiguration};
use cfgsync_store::ConfigStore;
use tracing::debug;

/// Maps a member's declared groups to its ordered set of records.
pub struct GroupResolver;

impl GroupResolver {
    /// Resolve the records for a member declaring `member_groups`.
    ///
    /// The cluster record always comes first, followed by the records of
    /// the declared groups in lexicographic order. Groups without a record
    /// are skipped: a member may belong to a group nobody has configured yet.
    pub fn resolve(store: &ConfigStore, member_groups: &BTreeSet<String>) -> ResolvedConfiguration {
        let mut records = Vec::with_capacity(member_groups.len() + 1);
        if let Some(cluster) = store.get(CLUSTER_CONFIG_NAME) {
            records.push((*cluster).clone());
        }

        for group in member_groups {
            if group == CLUSTER_CONFIG_NAME {
                continue;
            }
            match store.get(group) {
                Some(record) => records.push((*record).clone()),
                None => debug!(%group, "no configuration for declared group"),
            }
        }

        ResolvedConfiguration {
            groups: member_groups.iter().cloned().collect(),
            records,
        }
    }

    /// Record names a member with `member_groups` may depend on.
    pub fn candidate_records(member_groups: &BTreeSet<String>) -> Vec<String> {
        std::iter::once(CLUSTER_CONFIG_NAME.to_string())
            .chain(member_groups.iter().filter(|g| *g != CLUSTER_CONFIG_NAME).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgsync_core::{ConfigurationRecord, RegionDescriptor, parse_groups};

    fn seeded_store(dir: &std::path::Path) -> ConfigStore {
        let store = ConfigStore::open(dir).unwrap();
        for (name, size, region) in [
            ("cluster", "5000", "regionForCluster"),
            ("group1", "6000", "regionForGroup1"),
            ("group2", "7000", "regionForGroup2"),
        ] {
            let mut record = ConfigurationRecord::new(name);
            record.set_property("log-file-size-limit", size);
            record.add_region(RegionDescriptor::new(region, "REPLICATE"));
            store.put(&record).unwrap();
        }
        store
    }

    #[test]
    fn no_groups_gets_cluster_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let resolved = GroupResolver::resolve(&store, &parse_groups(""));
        assert_eq!(resolved.record_names(), vec!["cluster"]);
        assert_eq!(resolved.effective_properties()["log-file-size-limit"], "5000");
    }

    #[test]
    fn groups_sorted_and_last_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let resolved = GroupResolver::resolve(&store, &parse_groups("group2,group1"));
        assert_eq!(resolved.record_names(), vec!["cluster", "group1", "group2"]);
        assert_eq!(resolved.effective_properties()["log-file-size-limit"], "7000");

        let again = GroupResolver::resolve(&store, &parse_groups("group1,group2"));
        assert_eq!(again, resolved);
    }

    #[test]
    fn unknown_group_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let resolved = GroupResolver::resolve(&store, &parse_groups("group1,reporting"));
        assert_eq!(resolved.record_names(), vec!["cluster", "group1"]);
        assert_eq!(resolved.groups, vec!["group1", "reporting"]);
        assert!(resolved.includes("reporting"));
    }

    #[test]
    fn declaring_cluster_as_group_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path());

        let resolved = GroupResolver::resolve(&store, &parse_groups("cluster"));
        assert_eq!(resolved.record_names(), vec!["cluster"]);
        assert_eq!(
            GroupResolver::candidate_records(&parse_groups("cluster,group1")),
            vec!["cluster", "group1"]
        );
    }
}
