//! Host record: one managed endpoint and its collection lifecycle
//!
//! A host owns `<storage_root>/<identifier>`. Inside it live the `last_update`
//! marker, sealed monthly archives and, between a fetch and the next seal,
//! loose files pulled from the remote side.

use crate::archive::{self, ArchiveEngine};
use crate::error::{CollectorError, Result};
use crate::marker::{self, MARKER_FILE};
use chrono::{Duration, NaiveDate};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 3 x 30 days, not three calendar months.
pub const DEFAULT_STALENESS_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct HostRecord {
    address: String,
    identifier: String,
    directory: PathBuf,
    last_update: NaiveDate,
    staleness_window: Duration,
}

impl HostRecord {
    pub fn new(
        address: impl Into<String>,
        identifier: impl Into<String>,
        directory: impl Into<PathBuf>,
        last_update: NaiveDate,
    ) -> Self {
        Self {
            address: address.into(),
            identifier: identifier.into(),
            directory: directory.into(),
            last_update,
            staleness_window: Duration::days(DEFAULT_STALENESS_DAYS),
        }
    }

    /// Windows too large for `chrono` saturate, so the host never goes stale.
    pub fn with_staleness_days(mut self, days: i64) -> Self {
        self.staleness_window = Duration::try_days(days).unwrap_or(Duration::MAX);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn last_update(&self) -> NaiveDate {
        self.last_update
    }

    /// True iff more than the staleness window separates `now` from the last
    /// collection. Exactly the window is still fresh.
    pub fn is_stale(&self, now: NaiveDate) -> bool {
        now.signed_duration_since(self.last_update) > self.staleness_window
    }

    /// Records a successful collection on `now` and persists it.
    pub fn mark_updated(&mut self, now: NaiveDate) -> Result<()> {
        marker::write_marker(&self.directory, now)?;
        self.last_update = now;
        debug!("Marker of {} set to {}", self.identifier, marker::format_date(now));
        Ok(())
    }

    /// Seals every loose entry into this month's archive, then deletes them.
    ///
    /// If cleanup fails after the archive was written, the archive stays and
    /// the remaining loose entries are left for the next purge.
    pub fn seal_period(&self, now: NaiveDate) -> Result<PathBuf> {
        let loose = self.loose_entries()?;
        if loose.is_empty() {
            return Err(CollectorError::archive(&self.directory, "no loose files to archive"));
        }

        let archive_path = ArchiveEngine::compress(&self.directory, now)?;
        for entry in &loose {
            archive::remove_entry(entry)?;
        }

        info!(
            "Sealed {} loose entries of {} into {}",
            loose.len(),
            self.identifier,
            archive_path.display()
        );
        Ok(archive_path)
    }

    /// Deletes everything that is neither a sealed archive nor the marker.
    /// Returns the number of removed entries.
    pub fn purge_transient(&self) -> Result<usize> {
        let loose = self.loose_entries()?;
        for entry in &loose {
            archive::remove_entry(entry)?;
        }
        if !loose.is_empty() {
            info!("Purged {} stray entries from {}", loose.len(), self.identifier);
        }
        Ok(loose.len())
    }

    fn loose_entries(&self) -> Result<Vec<archive::DirEntryInfo>> {
        Ok(archive::sorted_entries(&self.directory)?
            .into_iter()
            .filter(|e| e.is_dir || (e.name != MARKER_FILE && !archive::is_sealed_archive(&e.name)))
            .collect())
    }
}
