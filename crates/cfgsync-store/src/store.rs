//! ConfigStore: file-system backed configuration records.
//!
//! Each record lives in its own directory under the store root (see
//! [`crate::layout`]). Every mutation is written to disk with
//! temp-then-rename before the in-memory snapshot is swapped, so readers
//! only ever observe committed records.
//!
//! Mutations of one record are serialised by a per-record lock; different
//! records can be written in parallel. Readers get `Arc` snapshots and never
//! block on writers except where they ask for a consistent multi-record view
//! with [`ConfigStore::read_locked`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cfgsync_core::{
    ArtifactRecord, CLUSTER_CONFIG_NAME, ConfigurationRecord, parse_stored_file_name, sha256_hex,
    stored_file_name,
};
use tracing::{debug, info, warn};

use crate::descriptor::{decode_descriptor, decode_properties, encode_descriptor, encode_properties};
use crate::error::{StoreError, StoreResult, io_at};
use crate::layout::*;

type RecordLock = Arc<RwLock<()>>;

/// Thread-safe configuration store rooted at a directory.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    records: RwLock<BTreeMap<String, Arc<ConfigurationRecord>>>,
    locks: Mutex<HashMap<String, RecordLock>>,
}

impl ConfigStore {
    /// Open the store at `root`, initialising an empty one if it does not exist.
    pub fn open(root: &Path) -> StoreResult<Self> {
        if !root.exists() {
            std::fs::create_dir_all(root).map_err(io_at(root))?;
            info!(?root, "initialised empty configuration store");
        }
        Self::load(root)
    }

    /// Reconstruct all records from the directory tree at `root`.
    ///
    /// Fails if `root` is missing, a record lacks its descriptor or
    /// properties file, or more than one record claims to be the cluster
    /// record. A missing cluster record is created.
    pub fn load(root: &Path) -> StoreResult<Self> {
        let records = read_tree(root)?;
        let store = Self {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                records: RwLock::new(records),
                locks: Mutex::new(HashMap::new()),
            }),
        };
        store.ensure_cluster_record()?;
        debug!(?root, records = store.list_names().len(), "configuration store loaded");
        Ok(store)
    }

    /// Re-read the tree from disk, replacing every in-memory record.
    pub fn reload(&self) -> StoreResult<()> {
        let records = read_tree(&self.inner.root)?;
        *self
            .inner
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner) = records;
        self.ensure_cluster_record()?;
        info!(root = ?self.inner.root, "configuration store reloaded");
        Ok(())
    }

    fn ensure_cluster_record(&self) -> StoreResult<()> {
        if self.get(CLUSTER_CONFIG_NAME).is_none() {
            self.update(CLUSTER_CONFIG_NAME, |_, _| Ok(()))?;
            info!("created cluster configuration record");
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Snapshot of a record.
    pub fn get(&self, name: &str) -> Option<Arc<ConfigurationRecord>> {
        self.inner
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Sorted names of all records.
    pub fn list_names(&self) -> Vec<String> {
        self.inner
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Persist `record` as a whole, replacing any previous version.
    pub fn put(&self, record: &ConfigurationRecord) -> StoreResult<()> {
        self.update(&record.name, |current, _| {
            *current = record.clone();
            Ok(())
        })?;
        Ok(())
    }

    /// Read-modify-write one record under its lock.
    ///
    /// A record that does not exist yet is created (auto-vivification of
    /// group configuration on first write). `f` receives the record's
    /// directory for writing artifact files. The record is only published
    /// once its metadata files are on disk; if anything fails, a newly
    /// created record directory is removed again.
    pub fn update<T, F>(&self, name: &str, f: F) -> StoreResult<(Arc<ConfigurationRecord>, T)>
    where
        F: FnOnce(&mut ConfigurationRecord, &Path) -> StoreResult<T>,
    {
        self.mutate(name, true, f)
    }

    /// Like [`ConfigStore::update`] but fails with `NotFound` for unknown records.
    pub fn update_existing<T, F>(
        &self,
        name: &str,
        f: F,
    ) -> StoreResult<(Arc<ConfigurationRecord>, T)>
    where
        F: FnOnce(&mut ConfigurationRecord, &Path) -> StoreResult<T>,
    {
        self.mutate(name, false, f)
    }

    fn mutate<T, F>(
        &self,
        name: &str,
        create: bool,
        f: F,
    ) -> StoreResult<(Arc<ConfigurationRecord>, T)>
    where
        F: FnOnce(&mut ConfigurationRecord, &Path) -> StoreResult<T>,
    {
        validate_record_name(name)?;
        let lock = self.lock_for(name);
        let _guard = lock.write().unwrap_or_else(PoisonError::into_inner);

        let (mut record, is_new) = match self.get(name) {
            Some(existing) => ((*existing).clone(), false),
            None if create => (ConfigurationRecord::new(name), true),
            None => return Err(StoreError::NotFound(name.to_string())),
        };

        let dir = record_dir(&self.inner.root, name);
        if is_new {
            std::fs::create_dir_all(&dir).map_err(io_at(&dir))?;
        }

        let result = f(&mut record, &dir).and_then(|value| {
            record.name = name.to_string();
            write_metadata(&dir, &record)?;
            Ok(value)
        });

        match result {
            Ok(value) => {
                let record = Arc::new(record);
                self.inner
                    .records
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_string(), Arc::clone(&record));
                if is_new {
                    info!(record = %name, "created configuration record");
                } else {
                    debug!(record = %name, "configuration record updated");
                }
                Ok((record, value))
            }
            Err(e) => {
                if is_new {
                    if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                        warn!(record = %name, error = %cleanup, "failed to remove unpublished record directory");
                    }
                }
                Err(e)
            }
        }
    }

    /// Run `f` while holding read locks on `names` (acquired in sorted order).
    ///
    /// No record in `names` can change while `f` runs, so everything `f`
    /// reads from them (including artifact files) belongs to one version.
    pub fn read_locked<T>(&self, names: &[String], f: impl FnOnce() -> T) -> T {
        let sorted: BTreeSet<&String> = names.iter().collect();
        let result = {
            let locks: Vec<RecordLock> = sorted.iter().map(|n| self.lock_for(n)).collect();
            let _guards: Vec<_> = locks
                .iter()
                .map(|l| l.read().unwrap_or_else(PoisonError::into_inner))
                .collect();
            f()
        };
        self.prune_unused_locks(&sorted);
        result
    }

    /// Run `f` while holding read locks on every record.
    pub fn read_locked_all<T>(&self, f: impl FnOnce() -> T) -> T {
        let names = self.list_names();
        self.read_locked(&names, f)
    }

    fn lock_for(&self, name: &str) -> RecordLock {
        let mut locks = self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Drop the locks of `names` that belong to no record and are not held.
    ///
    /// Joins name arbitrary groups, so without this every unknown group
    /// name would leave a lock behind for the life of the process.
    fn prune_unused_locks(&self, names: &BTreeSet<&String>) {
        let records = self.inner.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut locks = self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        for name in names {
            if records.contains_key(name.as_str()) {
                continue;
            }
            if locks.get(name.as_str()).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(name.as_str());
            }
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Write `{name}.xml` and `{name}.properties` for `record` into `dir`.
fn write_metadata(dir: &Path, record: &ConfigurationRecord) -> StoreResult<()> {
    let xml = encode_descriptor(&record.name, &record.regions, &record.artifacts);
    write_atomic(dir, &descriptor_file_name(&record.name), xml.as_bytes())?;
    let props = encode_properties(&record.properties);
    write_atomic(dir, &properties_file_name(&record.name), props.as_bytes())?;
    Ok(())
}

fn read_tree(root: &Path) -> StoreResult<BTreeMap<String, Arc<ConfigurationRecord>>> {
    let mut records = BTreeMap::new();
    for entry in std::fs::read_dir(root).map_err(io_at(root))? {
        let entry = entry.map_err(io_at(root))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(?path, "skipping record directory with non-UTF-8 name");
            continue;
        };
        if is_hidden(&name) {
            continue;
        }
        validate_record_name(&name)?;
        let record = read_record(&path, &name)?;
        records.insert(name, Arc::new(record));
    }
    Ok(records)
}

fn read_record(dir: &Path, name: &str) -> StoreResult<ConfigurationRecord> {
    let descriptor_path = dir.join(descriptor_file_name(name));
    let properties_path = dir.join(properties_file_name(name));
    if !descriptor_path.is_file() {
        return Err(StoreError::corrupt(name, format!("missing {}", descriptor_file_name(name))));
    }
    if !properties_path.is_file() {
        return Err(StoreError::corrupt(name, format!("missing {}", properties_file_name(name))));
    }

    let xml = std::fs::read_to_string(&descriptor_path).map_err(io_at(&descriptor_path))?;
    let descriptor = decode_descriptor(&xml).map_err(|reason| StoreError::corrupt(name, reason))?;
    if descriptor.name != name {
        if descriptor.name == CLUSTER_CONFIG_NAME {
            return Err(StoreError::DuplicateClusterRecord(name.to_string()));
        }
        return Err(StoreError::corrupt(
            name,
            format!("descriptor declares name {:?}", descriptor.name),
        ));
    }

    let text = std::fs::read_to_string(&properties_path).map_err(io_at(&properties_path))?;
    let properties = decode_properties(&text).map_err(|reason| StoreError::corrupt(name, reason))?;

    let mut record = ConfigurationRecord {
        name: name.to_string(),
        properties,
        regions: descriptor.regions,
        artifacts: descriptor.artifacts,
    };

    for artifact in &record.artifacts {
        let file = dir.join(artifact.stored_file_name());
        if !file.is_file() {
            return Err(StoreError::corrupt(
                name,
                format!("missing artifact file {}", artifact.stored_file_name()),
            ));
        }
    }

    if adopt_loose_artifacts(dir, &mut record)? {
        write_metadata(dir, &record)?;
    }
    Ok(record)
}

/// Reconcile artifact files that the descriptor does not list.
///
/// Files for a base name the record does not know yet are adopted: versioned
/// files keep their version, unversioned ones (as found in archives produced
/// by older tools) are renamed to version 1. Versioned files of a base name
/// the record already holds are leftovers of an interrupted deploy and are
/// removed. Returns whether the record changed.
fn adopt_loose_artifacts(dir: &Path, record: &mut ConfigurationRecord) -> StoreResult<bool> {
    let referenced: BTreeSet<String> =
        record.artifacts.iter().map(ArtifactRecord::stored_file_name).collect();

    let mut loose = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        if !entry.path().is_file() {
            continue;
        }
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_hidden(&file_name)
            || is_metadata_file(&record.name, &file_name)
            || referenced.contains(&file_name)
        {
            continue;
        }
        loose.push(file_name);
    }
    loose.sort();

    let mut changed = false;
    for file_name in loose {
        let path = dir.join(&file_name);
        let (base_name, version) = match parse_stored_file_name(&file_name) {
            Some((base, version)) => (base.to_string(), version),
            None => (file_name.clone(), 1),
        };

        if record.latest_version(&base_name) > 0 {
            if parse_stored_file_name(&file_name).is_some() {
                std::fs::remove_file(&path).map_err(io_at(&path))?;
                warn!(record = %record.name, file = %file_name, "removed unreferenced artifact file");
            } else {
                warn!(record = %record.name, file = %file_name, "ignoring unversioned file shadowed by a deployed artifact");
            }
            continue;
        }

        let content = std::fs::read(&path).map_err(io_at(&path))?;
        let stored = stored_file_name(&base_name, version);
        if stored != file_name {
            let target = dir.join(&stored);
            std::fs::rename(&path, &target).map_err(io_at(&target))?;
        }
        record.artifacts.push(ArtifactRecord {
            record_name: record.name.clone(),
            base_name,
            version,
            sha256: sha256_hex(&content),
            size_bytes: content.len() as u64,
        });
        info!(record = %record.name, file = %file_name, %stored, "adopted artifact file");
        changed = true;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgsync_core::RegionDescriptor;

    fn write_record_files(root: &Path, name: &str, xml: &str, props: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{name}.xml")), xml).unwrap();
        std::fs::write(dir.join(format!("{name}.properties")), props).unwrap();
    }

    #[test]
    fn open_initialises_cluster_record_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cluster_config");

        let store = ConfigStore::open(&root).unwrap();

        assert_eq!(store.list_names(), vec!["cluster"]);
        assert!(root.join("cluster/cluster.xml").is_file());
        assert!(root.join("cluster/cluster.properties").is_file());
    }

    #[test]
    fn put_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let mut group1 = ConfigurationRecord::new("group1");
        group1.set_property("log-file-size-limit", "6000");
        group1.add_region(RegionDescriptor::new("regionForGroup1", "REPLICATE"));
        store.put(&group1).unwrap();

        let reloaded = ConfigStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.list_names(), vec!["cluster", "group1"]);
        assert_eq!(*reloaded.get("group1").unwrap(), group1);
    }

    #[test]
    fn get_unknown_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        assert!(store.get("group9").is_none());
    }

    #[test]
    fn load_missing_root_fails_with_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigStore::load(&dir.path().join("nope")).err().unwrap();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn load_rejects_record_without_properties() {
        let dir = tempfile::tempdir().unwrap();
        let group = dir.path().join("group1");
        std::fs::create_dir_all(&group).unwrap();
        std::fs::write(group.join("group1.xml"), "<configuration name=\"group1\"/>").unwrap();

        let err = ConfigStore::load(dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::CorruptRecord { ref record, .. } if record == "group1"));
    }

    #[test]
    fn load_rejects_second_cluster_claim() {
        let dir = tempfile::tempdir().unwrap();
        write_record_files(dir.path(), "cluster", "<configuration name=\"cluster\"/>", "");
        write_record_files(dir.path(), "imposter", "<configuration name=\"cluster\"/>", "");

        let err = ConfigStore::load(dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::DuplicateClusterRecord(ref n) if n == "imposter"));
    }

    #[test]
    fn load_adopts_unversioned_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_record_files(
            dir.path(),
            "cluster",
            "<configuration name=\"cluster\"/>",
            "log-file-size-limit=5000\n",
        );
        std::fs::write(dir.path().join("cluster/cluster.jar"), b"PK-cluster").unwrap();

        let store = ConfigStore::load(dir.path()).unwrap();
        let cluster = store.get("cluster").unwrap();

        assert_eq!(cluster.artifacts.len(), 1);
        assert_eq!(cluster.artifacts[0].stored_file_name(), "cluster.jar#1");
        assert!(dir.path().join("cluster/cluster.jar#1").is_file());
        assert!(!dir.path().join("cluster/cluster.jar").exists());

        // The adoption is persisted: a second load sees the same record.
        let again = ConfigStore::load(dir.path()).unwrap();
        assert_eq!(again.get("cluster").unwrap(), cluster);
    }

    #[test]
    fn load_ignores_hidden_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("cluster/.tmpXYZ.tmp"), b"partial").unwrap();
        std::fs::create_dir_all(dir.path().join(".staging")).unwrap();

        let reloaded = ConfigStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.list_names(), store.list_names());
        assert!(reloaded.get("cluster").unwrap().artifacts.is_empty());
    }

    #[test]
    fn update_failure_leaves_no_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let result = store.update("group1", |_, _| -> StoreResult<()> {
            Err(StoreError::NotFound("simulated".into()))
        });

        assert!(result.is_err());
        assert!(store.get("group1").is_none());
        assert!(!dir.path().join("group1").exists());
        assert!(ConfigStore::load(dir.path()).is_ok());
    }

    #[test]
    fn update_existing_requires_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        let err = store.update_existing("group1", |_, _| Ok(())).err().unwrap();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn invalid_record_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        let err = store.put(&ConfigurationRecord::new("../escape")).err().unwrap();
        assert!(matches!(err, StoreError::InvalidName(_)));
    }

    #[test]
    fn reload_picks_up_external_changes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        write_record_files(dir.path(), "group2", "<configuration name=\"group2\"/>", "a=b\n");

        assert!(store.get("group2").is_none());
        store.reload().unwrap();
        assert_eq!(store.get("group2").unwrap().properties["a"], "b");
    }

    #[test]
    fn concurrent_updates_to_one_record_are_serialised() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .update("group1", |record, _| {
                                let n: u32 = record
                                    .properties
                                    .get("counter")
                                    .map(|v| v.parse().unwrap())
                                    .unwrap_or(0);
                                record.set_property("counter", &(n + 1).to_string());
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.get("group1").unwrap().properties["counter"], "80");
    }

    #[test]
    fn reads_of_unknown_records_do_not_accumulate_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).unwrap();
        store.put(&ConfigurationRecord::new("group1")).unwrap();

        for i in 0..500 {
            let names = vec!["cluster".to_string(), "group1".to_string(), format!("nosuch{i}")];
            assert!(store.read_locked(&names, || store.get("group1").is_some()));
        }

        assert!(store.tracked_locks() <= store.list_names().len());
        // Known records keep their locks and stay usable.
        store
            .update("group1", |record, _| {
                record.set_property("k", "v");
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get("group1").unwrap().properties["k"], "v");
    }
}
