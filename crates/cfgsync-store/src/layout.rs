//! On-disk layout of the configuration store.
//!
//! ```text
//! cluster_config/
//!   cluster/
//!     cluster.xml          regions + artifact sequence
//!     cluster.properties   property overrides
//!     cluster.jar#1        artifact files, `{base}#{version}`
//!   group1/
//!     group1.xml
//!     group1.properties
//! ```
//!
//! Files are replaced with write-to-temp-then-rename. Temporary files are
//! hidden (leading `.`) and never read back as part of a record.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult, io_at};

pub const DESCRIPTOR_EXTENSION: &str = "xml";
pub const PROPERTIES_EXTENSION: &str = "properties";

pub fn record_dir(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// `{name}.xml`
pub fn descriptor_file_name(name: &str) -> String {
    format!("{name}.{DESCRIPTOR_EXTENSION}")
}

/// `{name}.properties`
pub fn properties_file_name(name: &str) -> String {
    format!("{name}.{PROPERTIES_EXTENSION}")
}

/// Hidden files are temporaries or editor droppings, not record content.
pub fn is_hidden(file_name: &str) -> bool {
    file_name.starts_with('.')
}

/// Whether `file_name` is one of the two metadata files of `record`.
pub fn is_metadata_file(record: &str, file_name: &str) -> bool {
    file_name == descriptor_file_name(record) || file_name == properties_file_name(record)
}

/// Record names become directory names, so they must be plain path segments.
pub fn validate_record_name(name: &str) -> StoreResult<()> {
    if is_plain_segment(name) && !name.contains(cfgsync_core::VERSION_SEPARATOR) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Artifact base names become file names inside a record directory.
pub fn validate_artifact_name(record: &str, base_name: &str) -> StoreResult<()> {
    if is_plain_segment(base_name) && !is_metadata_file(record, base_name) {
        Ok(())
    } else {
        Err(StoreError::InvalidName(base_name.to_string()))
    }
}

fn is_plain_segment(name: &str) -> bool {
    !name.is_empty()
        && !is_hidden(name)
        && !name.contains(['/', '\\', '\0'])
        && name.trim() == name
}

/// Durably replace `dir/file_name` with `bytes`.
///
/// The content is flushed to disk before the rename makes it visible; the
/// temporary file is removed on every error path when it is dropped.
pub fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> StoreResult<()> {
    let target = dir.join(file_name);
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io_at(dir))?;
    tmp.write_all(bytes).map_err(io_at(tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_at(&target))?;
    tmp.persist(&target).map_err(|e| StoreError::Io {
        path: target.clone(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_names() {
        assert!(validate_record_name("cluster").is_ok());
        assert!(validate_record_name("group-1").is_ok());
        assert!(validate_record_name("").is_err());
        assert!(validate_record_name("../etc").is_err());
        assert!(validate_record_name(".hidden").is_err());
        assert!(validate_record_name("a#1").is_err());
        assert!(validate_record_name(" padded").is_err());
    }

    #[test]
    fn artifact_names_cannot_shadow_metadata() {
        assert!(validate_artifact_name("group1", "group1.jar").is_ok());
        assert!(validate_artifact_name("group1", "group1.xml").is_err());
        assert!(validate_artifact_name("group1", "group1.properties").is_err());
        assert!(validate_artifact_name("group1", "lib/evil.jar").is_err());
    }

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        write_atomic(dir.path(), "a.properties", b"one").unwrap();
        write_atomic(dir.path(), "a.properties", b"two").unwrap();

        assert_eq!(std::fs::read(dir.path().join("a.properties")).unwrap(), b"two");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["a.properties"]);
    }
}
