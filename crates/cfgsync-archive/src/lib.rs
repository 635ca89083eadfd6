//! cfgsync-archive: portable zip archive of a configuration store.
//!
//! The archive holds the store tree verbatim: one `{record}/{file}` entry
//! per descriptor, properties and artifact file. Unpacking validates the
//! whole entry set before anything is written, and removes a partially
//! written target if extraction fails midway.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::{Component, Path, PathBuf};

use cfgsync_store::layout::{descriptor_file_name, is_hidden, properties_file_name, validate_record_name};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Result type alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Zip every record directory under `root`.
pub fn pack(root: &Path) -> ArchiveResult<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = 0usize;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_str().is_some_and(is_hidden));

    for entry in walker {
        let entry = entry.map_err(|e| ArchiveError::Io {
            path: e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf()),
            source: e.into(),
        })?;
        if entry.depth() != 2 || !entry.file_type().is_file() {
            if entry.depth() == 1 && entry.file_type().is_file() {
                warn!(path = ?entry.path(), "skipping file outside any record directory");
            }
            continue;
        }

        let record = entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::CorruptArchive(format!("unnamed record for {:?}", entry.path())))?;
        let file = entry
            .file_name()
            .to_str()
            .ok_or_else(|| ArchiveError::CorruptArchive(format!("non-UTF-8 file name {:?}", entry.path())))?;

        let content = std::fs::read(entry.path()).map_err(io_at(entry.path()))?;
        zip.start_file(format!("{record}/{file}"), options)?;
        zip.write_all(&content).map_err(io_at(entry.path()))?;
        entries += 1;
    }

    let cursor = zip.finish()?;
    let bytes = cursor.into_inner();
    info!(?root, entries, size = bytes.len(), "configuration archive packed");
    Ok(bytes)
}

/// Extract an archive produced by [`pack`] into `target`.
///
/// `target` must not exist or be empty. Returns the record names found.
pub fn unpack(bytes: &[u8], target: &Path) -> ArchiveResult<Vec<String>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ArchiveError::CorruptArchive(format!("not a zip archive: {e}")))?;

    let layout = validate(&mut archive)?;

    if target.exists() {
        let mut entries = std::fs::read_dir(target).map_err(io_at(target))?;
        if entries.next().is_some() {
            return Err(ArchiveError::Io {
                path: target.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "unpack target is not empty",
                ),
            });
        }
    }

    if let Err(e) = extract(&mut archive, &layout, target) {
        if let Err(cleanup) = std::fs::remove_dir_all(target) {
            warn!(?target, error = %cleanup, "failed to remove partially unpacked archive");
        }
        return Err(e);
    }

    let records: Vec<String> = layout.records.keys().cloned().collect();
    info!(?target, records = records.len(), "configuration archive unpacked");
    Ok(records)
}

/// Entries grouped by record, plus the archive index of each file.
struct Layout {
    records: BTreeMap<String, Vec<(String, usize)>>,
}

fn validate(archive: &mut ZipArchive<Cursor<&[u8]>>) -> ArchiveResult<Layout> {
    let mut records: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();

    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| ArchiveError::CorruptArchive(format!("unreadable entry {index}: {e}")))?;
        let raw_name = file.name().to_string();
        let path = file
            .enclosed_name()
            .ok_or_else(|| ArchiveError::CorruptArchive(format!("unsafe entry path {raw_name:?}")))?;
        let parts: Vec<String> = path
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str().map(str::to_string),
                _ => None,
            })
            .collect::<Option<_>>()
            .ok_or_else(|| ArchiveError::CorruptArchive(format!("unsafe entry path {raw_name:?}")))?;

        if parts.iter().any(|p| is_hidden(p)) {
            debug!(entry = %raw_name, "skipping hidden archive entry");
            continue;
        }

        match (file.is_dir(), parts.as_slice()) {
            (true, [record]) => {
                records.entry(record.clone()).or_default();
            }
            (false, [record, name]) => {
                records.entry(record.clone()).or_default().push((name.clone(), index));
            }
            _ => {
                return Err(ArchiveError::CorruptArchive(format!(
                    "entry {raw_name:?} is not a record file"
                )));
            }
        }
    }

    if records.is_empty() {
        return Err(ArchiveError::CorruptArchive(
            "archive contains no configuration records".to_string(),
        ));
    }

    for (record, files) in &records {
        validate_record_name(record)
            .map_err(|_| ArchiveError::CorruptArchive(format!("invalid record name {record:?}")))?;
        for required in [descriptor_file_name(record), properties_file_name(record)] {
            if !files.iter().any(|(name, _)| *name == required) {
                return Err(ArchiveError::CorruptArchive(format!(
                    "record {record} is missing {required}"
                )));
            }
        }
    }

    Ok(Layout { records })
}

fn extract(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    layout: &Layout,
    target: &Path,
) -> ArchiveResult<()> {
    for (record, files) in &layout.records {
        let dir = target.join(record);
        std::fs::create_dir_all(&dir).map_err(io_at(&dir))?;
        for (name, index) in files {
            let path = dir.join(name);
            let mut entry = archive.by_index(*index)?;
            let mut out = std::fs::File::create(&path).map_err(io_at(&path))?;
            std::io::copy(&mut entry, &mut out).map_err(io_at(&path))?;
            out.sync_all().map_err(io_at(&path))?;
        }
    }
    Ok(())
}
