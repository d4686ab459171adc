//! Archive engine: monthly `.tgz` snapshots of a host directory
//!
//! Archives are named `<YYYY_MM>.tgz` and their entries are rooted at the
//! host directory name (`alpha/apt/history.log`), so extracting one into the
//! parent of the host directory repopulates it in place.

use crate::error::{CollectorError, Result};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ARCHIVE_EXTENSION: &str = "tgz";
const PARTIAL_SUFFIX: &str = ".partial";

/// Where a legacy archive is unpacked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractTarget {
    /// Parent of the host directory (the configured storage root).
    #[default]
    StorageRoot,
    /// Process working directory, whatever the storage root is.
    WorkingDirectory,
}

impl ExtractTarget {
    pub fn resolve(self, host_directory: &Path) -> Result<PathBuf> {
        match self {
            Self::StorageRoot => Ok(match host_directory.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            }),
            Self::WorkingDirectory => {
                std::env::current_dir().map_err(|e| CollectorError::filesystem(".", e))
            }
        }
    }
}

pub fn archive_name(period: NaiveDate) -> String {
    format!("{}.{}", period.format("%Y_%m"), ARCHIVE_EXTENSION)
}

/// Only names produced by `archive_name` (`YYYY_MM.tgz`) are sealed. Any
/// other `.tgz` in a host directory is fetched data.
pub fn is_sealed_archive(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(&format!(".{ARCHIVE_EXTENSION}")) else {
        return false;
    };
    let bytes = stem.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'_'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || b.is_ascii_digit())
}

fn is_partial(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PARTIAL_SUFFIX)
}

/// One entry of a host directory.
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Lists `directory` sorted by name, so "first entry" is deterministic.
pub fn sorted_entries(directory: &Path) -> Result<Vec<DirEntryInfo>> {
    let read_dir = fs::read_dir(directory).map_err(|e| CollectorError::filesystem(directory, e))?;
    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| CollectorError::filesystem(directory, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| CollectorError::filesystem(entry.path(), e))?;
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
            is_dir: file_type.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Removes a file or a whole subtree.
pub fn remove_entry(entry: &DirEntryInfo) -> Result<()> {
    let removed = if entry.is_dir {
        fs::remove_dir_all(&entry.path)
    } else {
        fs::remove_file(&entry.path)
    };
    removed.map_err(|e| CollectorError::filesystem(&entry.path, e))
}

pub struct ArchiveEngine;

impl ArchiveEngine {
    /// Seals the current content of `directory` into `<YYYY_MM>.tgz` for
    /// `period`. Existing sealed archives are left out of the new one; an
    /// archive of the same month is replaced.
    pub fn compress(directory: &Path, period: NaiveDate) -> Result<PathBuf> {
        let root_name = directory
            .file_name()
            .ok_or_else(|| CollectorError::archive(directory, "directory has no name"))?
            .to_os_string();
        let name = archive_name(period);
        let final_path = directory.join(&name);
        let partial_path = directory.join(format!(".{name}{PARTIAL_SUFFIX}"));

        let written = Self::write_archive(directory, Path::new(&root_name), &partial_path);
        if let Err(e) = written {
            let _ = fs::remove_file(&partial_path);
            return Err(e);
        }

        fs::rename(&partial_path, &final_path).map_err(|e| CollectorError::filesystem(&final_path, e))?;
        info!("Sealed {} into {}", directory.display(), final_path.display());
        Ok(final_path)
    }

    fn write_archive(directory: &Path, root_name: &Path, partial_path: &Path) -> Result<()> {
        let file = File::create(partial_path).map_err(|e| CollectorError::filesystem(partial_path, e))?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.follow_symlinks(false);

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |e: std::io::Error| CollectorError::filesystem(path, e)
        };

        builder
            .append_dir(root_name, directory)
            .map_err(io_err(directory))?;

        for entry in sorted_entries(directory)? {
            if is_sealed_archive(&entry.name) || is_partial(&entry.name) {
                continue;
            }
            let name_in_archive = root_name.join(&entry.name);
            debug!("Adding {} to archive", name_in_archive.display());
            if entry.is_dir {
                builder
                    .append_dir_all(&name_in_archive, &entry.path)
                    .map_err(io_err(&entry.path))?;
            } else {
                builder
                    .append_path_with_name(&entry.path, &name_in_archive)
                    .map_err(io_err(&entry.path))?;
            }
        }

        let encoder = builder.into_inner().map_err(io_err(partial_path))?;
        let file = encoder.finish().map_err(io_err(partial_path))?;
        file.sync_all().map_err(io_err(partial_path))?;
        Ok(())
    }

    /// Extracts the first entry of `directory` into `target` when that entry
    /// is a sealed archive. Returns the extracted archive, if any.
    pub fn decompress(directory: &Path, target: &Path) -> Result<Option<PathBuf>> {
        let Some(first) = sorted_entries(directory)?.into_iter().next() else {
            return Ok(None);
        };
        if first.is_dir || !is_sealed_archive(&first.name) {
            return Ok(None);
        }

        let file = File::open(&first.path).map_err(|e| CollectorError::filesystem(&first.path, e))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive
            .unpack(target)
            .map_err(|e| CollectorError::archive(&first.path, format!("extraction into {} failed: {e}", target.display())))?;

        info!("Extracted {} into {}", first.path.display(), target.display());
        Ok(Some(first.path))
    }
}
