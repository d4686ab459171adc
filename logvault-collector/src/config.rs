//! Configuration management
//!
//! Handles:
//! - Fleet definition and storage locations
//! - Staleness window and worker pool size
//! - SFTP transport and ping probe settings
//! - Credential source (prompt, keyring, environment)

use crate::archive::ExtractTarget;
use crate::credentials::CredentialSource;
use crate::error::{CollectorError, Result};
use crate::fleet::CommentFilter;
use crate::host::DEFAULT_STALENESS_DAYS;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG: &str = "LOGVAULT_CONFIG";

/// About 100 years.
const MAX_STALENESS_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub fleet: FleetConfig,
    pub schedule: ScheduleConfig,
    pub transport: TransportConfig,
    pub reachability: ReachabilityConfig,
    pub archive: ArchiveConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub definition_file: PathBuf,
    pub storage_root: PathBuf,
    /// Reproduce the historical filter that never skipped comment lines.
    pub legacy_comment_filter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub staleness_days: i64,
    pub max_parallel_hosts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub port: u16,
    pub remote_root: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub extract_into: ExtractTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub source: CredentialSource,
    pub username: Option<String>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            definition_file: PathBuf::from("data").join("IPs"),
            storage_root: PathBuf::from("."),
            legacy_comment_filter: false,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            staleness_days: DEFAULT_STALENESS_DAYS,
            max_parallel_hosts: 1,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 22,
            remote_root: "/var/log".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self { timeout_secs: 2 }
    }
}

impl FleetConfig {
    pub fn comment_filter(&self) -> CommentFilter {
        if self.legacy_comment_filter {
            CommentFilter::Legacy
        } else {
            CommentFilter::Strict
        }
    }
}

impl CollectorConfig {
    /// Loads `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_file_path()?,
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| CollectorError::filesystem(&path, e))?;
        let config: CollectorConfig = toml::from_str(&content).map_err(|e| CollectorError::Config {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        config.validate(&path)?;
        Ok(config)
    }

    /// Writes the config, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// `$LOGVAULT_CONFIG`, else the OS-specific config directory.
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or_else(|| CollectorError::Config {
            path: PathBuf::from("~"),
            reason: "could not find the user config directory".to_string(),
        })?;
        path.push("logvault");
        path.push("config.toml");
        Ok(path)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: &str| CollectorError::Config {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        if self.schedule.staleness_days < 0 {
            return Err(invalid("schedule.staleness_days must not be negative"));
        }
        if self.schedule.staleness_days > MAX_STALENESS_DAYS {
            return Err(invalid("schedule.staleness_days is out of range"));
        }
        if self.schedule.max_parallel_hosts == 0 {
            return Err(invalid("schedule.max_parallel_hosts must be at least 1"));
        }
        if self.transport.remote_root.is_empty() {
            return Err(invalid("transport.remote_root must not be empty"));
        }
        if self.credentials.source == CredentialSource::Keyring && self.credentials.username.is_none() {
            return Err(invalid("credentials.username is required with the keyring source"));
        }
        Ok(())
    }
}
