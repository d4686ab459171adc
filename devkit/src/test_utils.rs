/*!
Test harness for collector runs

Provides:
- A throwaway storage root with a fleet definition file
- Mock transport and probe wired into a `Collector`
- Helpers to seed markers and inspect host directories and archives
*/

use crate::transport_stub::{MockProbe, MockTransport};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use flate2::read::GzDecoder;
use logvault_collector::credentials::StaticCredentials;
use logvault_collector::{marker, Collector, CollectorConfig, Credentials};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_USER: &str = "collector";
pub const TEST_SECRET: &str = "s3cret";

pub struct TestHarness {
    root: TempDir,
    pub transport: MockTransport,
    pub probe: MockProbe,
}

impl TestHarness {
    pub fn new() -> Result<Self> {
        env_logger::try_init().ok();

        Ok(Self {
            root: TempDir::new().context("Failed to create temp storage root")?,
            transport: MockTransport::new(),
            probe: MockProbe::new(),
        })
    }

    pub fn storage_root(&self) -> &Path {
        self.root.path()
    }

    pub fn fleet_file(&self) -> PathBuf {
        self.root.path().join("data").join("IPs")
    }

    pub fn host_dir(&self, identifier: &str) -> PathBuf {
        self.root.path().join(identifier)
    }

    /// Writes `data/IPs` from raw lines.
    pub fn write_fleet(&self, lines: &[&str]) -> Result<PathBuf> {
        let path = self.fleet_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, lines.join("\n") + "\n")?;
        log::info!("Fleet file with {} lines at {}", lines.len(), path.display());
        Ok(path)
    }

    /// Creates the host directory with a marker already in place.
    pub fn seed_marker(&self, identifier: &str, date: NaiveDate) -> Result<PathBuf> {
        let dir = self.host_dir(identifier);
        fs::create_dir_all(&dir)?;
        marker::write_marker(&dir, date)?;
        Ok(dir)
    }

    /// Drops a loose file into a host directory.
    pub fn seed_file(&self, identifier: &str, relative: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.host_dir(identifier).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    pub fn read_marker(&self, identifier: &str) -> Result<Option<NaiveDate>> {
        Ok(marker::read_marker(&self.host_dir(identifier))?)
    }

    pub fn marker_text(&self, identifier: &str) -> Result<String> {
        let path = marker::marker_path(&self.host_dir(identifier));
        fs::read_to_string(&path).with_context(|| format!("No marker at {}", path.display()))
    }

    /// Top-level entry names of a host directory, sorted.
    pub fn entries(&self, identifier: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.host_dir(identifier))? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Member paths of a host archive, sorted, without trailing slashes.
    pub fn archive_members(&self, identifier: &str, archive_name: &str) -> Result<Vec<String>> {
        let path = self.host_dir(identifier).join(archive_name);
        let file = File::open(&path).with_context(|| format!("No archive at {}", path.display()))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut names = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            names.push(entry.path()?.to_string_lossy().trim_end_matches('/').to_string());
        }
        names.sort();
        Ok(names)
    }

    /// Config pointing at this harness' storage root and fleet file.
    pub fn config(&self) -> CollectorConfig {
        let mut config = CollectorConfig::default();
        config.fleet.definition_file = self.fleet_file();
        config.fleet.storage_root = self.storage_root().to_path_buf();
        config
    }

    pub fn collector(&self) -> Collector {
        Collector::new(
            Arc::new(self.transport.clone()),
            Arc::new(self.probe.clone()),
            Arc::new(StaticCredentials::new(Credentials::new(TEST_USER, TEST_SECRET))),
        )
    }
}
