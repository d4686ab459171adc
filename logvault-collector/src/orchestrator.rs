//! Fleet orchestrator
//!
//! 1. Load the fleet definition
//! 2. Reconcile every entry with its storage directory (bootstrap, legacy
//!    archive extraction, marker read)
//! 3. Drive each host through its lifecycle once, one task per host, at most
//!    `max_parallel_hosts` at a time
//!
//! ```text
//! STALE + unreachable  -> report "unreachable"
//! STALE + reachable    -> fetch -> mark_updated -> seal_period
//!                         fetch failure -> report, nothing mutated
//! FRESH                -> purge_transient
//! ```

use crate::archive::{ArchiveEngine, ExtractTarget};
use crate::config::CollectorConfig;
use crate::credentials::{
    CredentialProvider, CredentialSource, EnvCredentials, KeyringCredentials, PromptCredentials,
};
use crate::error::{CollectorError, Result};
use crate::fleet::{self, FleetEntry};
use crate::host::HostRecord;
use crate::marker;
use crate::reachability::{PingProbe, Reachability};
use crate::transport::{SftpTransport, Transport};
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Reconciliation

#[derive(Debug)]
pub struct ReconcileFailure {
    pub position: usize,
    pub entry: FleetEntry,
    pub error: CollectorError,
}

/// Hosts ready for a pass, plus the entries whose on-disk state was unusable.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// `(position in the fleet file, record)`
    pub hosts: Vec<(usize, HostRecord)>,
    pub failures: Vec<ReconcileFailure>,
}

pub fn reconcile(
    entries: &[FleetEntry],
    storage_root: &Path,
    extract_into: ExtractTarget,
    staleness_days: i64,
) -> Reconciliation {
    let mut reconciliation = Reconciliation::default();

    for (position, entry) in entries.iter().enumerate() {
        match reconcile_entry(entry, storage_root, extract_into) {
            Ok(host) => reconciliation
                .hosts
                .push((position, host.with_staleness_days(staleness_days))),
            Err(error) => {
                warn!("Cannot prepare host {} ({}): {}", entry.address, entry.identifier, error);
                reconciliation.failures.push(ReconcileFailure {
                    position,
                    entry: entry.clone(),
                    error,
                });
            }
        }
    }

    reconciliation
}

fn reconcile_entry(entry: &FleetEntry, storage_root: &Path, extract_into: ExtractTarget) -> Result<HostRecord> {
    let directory = storage_root.join(&entry.identifier);

    if !directory.exists() {
        fs::create_dir_all(&directory).map_err(|e| CollectorError::filesystem(&directory, e))?;
        marker::write_marker(&directory, marker::epoch())?;
        info!("Bootstrapped {} for {}", directory.display(), entry.address);
        return Ok(HostRecord::new(&entry.address, &entry.identifier, directory, marker::epoch()));
    }

    if !marker::marker_path(&directory).exists() {
        let target = extract_into.resolve(&directory)?;
        if let Some(archive) = ArchiveEngine::decompress(&directory, &target)? {
            info!("Restored {} from legacy archive {}", entry.identifier, archive.display());
        }
    }

    let last_update = match marker::read_marker(&directory)? {
        Some(date) => date,
        None => {
            warn!("{} has no marker, treating it as never collected", directory.display());
            marker::write_marker(&directory, marker::epoch())?;
            marker::epoch()
        }
    };

    Ok(HostRecord::new(&entry.address, &entry.identifier, directory, last_update))
}

// ---------------------------------------------------------------------------
// Outcomes

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reconcile,
    Purge,
    MarkUpdated,
    Seal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reconcile => "preparation",
            Stage::Purge => "purge",
            Stage::MarkUpdated => "marker update",
            Stage::Seal => "archiving",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostOutcome {
    Collected {
        files: usize,
        directories: usize,
        bytes: u64,
        skipped: usize,
        archive: PathBuf,
    },
    Fresh {
        purged: usize,
    },
    Unreachable,
    FetchFailed {
        error_kind: String,
        reason: String,
    },
    Failed {
        stage: Stage,
        error_kind: String,
        reason: String,
    },
}

impl HostOutcome {
    fn fetch_failed(error: &CollectorError) -> Self {
        Self::FetchFailed {
            error_kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }

    fn failed(stage: Stage, error: &CollectorError) -> Self {
        Self::Failed {
            stage,
            error_kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    #[serde(skip)]
    position: usize,
    pub address: String,
    pub identifier: String,
    pub last_update: Option<NaiveDate>,
    pub outcome: HostOutcome,
}

impl HostReport {
    fn new(position: usize, host: &HostRecord, outcome: HostOutcome) -> Self {
        Self {
            position,
            address: host.address().to_string(),
            identifier: host.identifier().to_string(),
            last_update: Some(host.last_update()),
            outcome,
        }
    }
}

impl fmt::Display for HostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            HostOutcome::Collected { files, directories, skipped, archive, .. } => {
                write!(
                    f,
                    "Host {} reachable. Logs of {} fetched ({} files, {} directories",
                    self.address, self.identifier, files, directories
                )?;
                if *skipped > 0 {
                    write!(f, ", {skipped} entries skipped")?;
                }
                write!(f, ") and sealed into {}.", archive.display())
            }
            HostOutcome::Fresh { purged } => {
                write!(f, "Host {}: no log collection needed", self.address)?;
                if let Some(date) = self.last_update {
                    write!(f, " (last update {})", marker::format_date(date))?;
                }
                if *purged > 0 {
                    write!(f, ", {purged} stray entries removed")?;
                }
                f.write_str(".")
            }
            HostOutcome::Unreachable => write!(f, "Host {} is unreachable.", self.address),
            HostOutcome::FetchFailed { reason, .. } => {
                write!(f, "Logs of host {} not fetched: {}", self.address, reason)
            }
            HostOutcome::Failed { stage, reason, .. } => {
                write!(f, "Host {} ({}): {} failed: {}", self.address, self.identifier, stage, reason)
            }
        }
    }
}

/// Everything one pass did, in fleet file order.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub hosts: Vec<HostReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub collected: usize,
    pub fresh: usize,
    pub unreachable: usize,
    pub fetch_failed: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            date,
            hosts: Vec::new(),
        }
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for report in &self.hosts {
            match report.outcome {
                HostOutcome::Collected { .. } => counts.collected += 1,
                HostOutcome::Fresh { .. } => counts.fresh += 1,
                HostOutcome::Unreachable => counts.unreachable += 1,
                HostOutcome::FetchFailed { .. } => counts.fetch_failed += 1,
                HostOutcome::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    pub fn report(&self, identifier: &str) -> Option<&HostReport> {
        self.hosts.iter().find(|r| r.identifier == identifier)
    }

    pub async fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run summary")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collector

#[derive(Clone)]
pub struct Collector {
    transport: Arc<dyn Transport>,
    probe: Arc<dyn Reachability>,
    credentials: Arc<dyn CredentialProvider>,
    remote_root: String,
    max_parallel_hosts: usize,
}

impl Collector {
    pub fn new(
        transport: Arc<dyn Transport>,
        probe: Arc<dyn Reachability>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            transport,
            probe,
            credentials,
            remote_root: "/var/log".to_string(),
            max_parallel_hosts: 1,
        }
    }

    pub fn with_remote_root(mut self, remote_root: impl Into<String>) -> Self {
        self.remote_root = remote_root.into();
        self
    }

    pub fn with_max_parallel_hosts(mut self, max_parallel_hosts: usize) -> Self {
        self.max_parallel_hosts = max_parallel_hosts.max(1);
        self
    }

    /// Production wiring: SFTP transport, system ping, configured credentials.
    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        let transport = SftpTransport::new(config.transport.port, Duration::from_secs(config.transport.timeout_secs));
        let probe = PingProbe::new(Duration::from_secs(config.reachability.timeout_secs));
        let username = config.credentials.username.clone();
        let credentials: Arc<dyn CredentialProvider> = match config.credentials.source {
            CredentialSource::Prompt => Arc::new(PromptCredentials::new(username)),
            CredentialSource::Keyring => {
                let username = username.ok_or_else(|| CollectorError::Config {
                    path: PathBuf::from("credentials.username"),
                    reason: "required with the keyring source".to_string(),
                })?;
                Arc::new(KeyringCredentials::new(username))
            }
            CredentialSource::Env => Arc::new(EnvCredentials::new(username)),
        };

        Ok(Self::new(Arc::new(transport), Arc::new(probe), credentials)
            .with_remote_root(config.transport.remote_root.clone())
            .with_max_parallel_hosts(config.schedule.max_parallel_hosts))
    }

    /// One lifecycle step for one host. Never fails: errors become outcomes.
    pub fn process_host(&self, host: &mut HostRecord, today: NaiveDate) -> HostOutcome {
        if !host.is_stale(today) {
            return match host.purge_transient() {
                Ok(purged) => HostOutcome::Fresh { purged },
                Err(e) => {
                    error!("Purge of {} failed: {}", host.identifier(), e);
                    HostOutcome::failed(Stage::Purge, &e)
                }
            };
        }

        if !self.probe.is_reachable(host.address()) {
            return HostOutcome::Unreachable;
        }
        info!("Host {} reachable, fetching logs into {}", host.address(), host.directory().display());

        let fetched = self
            .credentials
            .credentials(host)
            .and_then(|creds| {
                self.transport
                    .fetch_tree(host.address(), &creds, &self.remote_root, host.directory())
            });
        let report = match fetched {
            Ok(report) => report,
            Err(e) => {
                warn!("Fetch from {} failed: {}", host.address(), e);
                return HostOutcome::fetch_failed(&e);
            }
        };

        if let Err(e) = host.mark_updated(today) {
            error!("Marker update of {} failed: {}", host.identifier(), e);
            return HostOutcome::failed(Stage::MarkUpdated, &e);
        }

        match host.seal_period(today) {
            Ok(archive) => HostOutcome::Collected {
                files: report.files,
                directories: report.directories,
                bytes: report.bytes,
                skipped: report.skipped.len(),
                archive,
            },
            Err(e) => {
                error!("Archiving of {} failed: {}", host.identifier(), e);
                HostOutcome::failed(Stage::Seal, &e)
            }
        }
    }

    /// Runs every host once. Hosts sharing an identifier share a directory,
    /// so they are chained inside a single task.
    pub async fn run_pass(&self, hosts: Vec<(usize, HostRecord)>, today: NaiveDate) -> RunSummary {
        let mut summary = RunSummary::new(today);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel_hosts));
        let mut tasks = JoinSet::new();

        for group in group_by_identifier(hosts) {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let collector = self.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                group
                    .into_iter()
                    .map(|(position, mut host)| {
                        let outcome = collector.process_host(&mut host, today);
                        let report = HostReport::new(position, &host, outcome);
                        println!("{report}");
                        report
                    })
                    .collect::<Vec<_>>()
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(reports) => summary.hosts.extend(reports),
                Err(e) => error!("Host task aborted: {}", e),
            }
        }
        summary.hosts.sort_by_key(|r| r.position);
        summary
    }

    /// Full run: fleet file, reconciliation, pass. Only a missing fleet file
    /// (or an unusable storage root) makes this fail.
    pub async fn run(&self, config: &CollectorConfig, today: NaiveDate) -> anyhow::Result<RunSummary> {
        let entries = fleet::load_fleet(&config.fleet.definition_file, config.fleet.comment_filter())?;
        info!("Loaded {} hosts from {}", entries.len(), config.fleet.definition_file.display());

        let storage_root = config.fleet.storage_root.clone();
        fs::create_dir_all(&storage_root)
            .with_context(|| format!("Cannot create storage root {}", storage_root.display()))?;

        let extract_into = config.archive.extract_into;
        let staleness_days = config.schedule.staleness_days;
        let reconciliation = tokio::task::spawn_blocking(move || {
            reconcile(&entries, &storage_root, extract_into, staleness_days)
        })
        .await
        .context("Reconciliation task aborted")?;

        // Hosts that could not be prepared are reported before the pass starts.
        let skipped = failure_reports(reconciliation.failures);
        for report in &skipped {
            println!("{report}");
        }

        let mut summary = self.run_pass(reconciliation.hosts, today).await;
        summary.hosts.extend(skipped);
        summary.hosts.sort_by_key(|r| r.position);

        let counts = summary.counts();
        info!(
            "Run {} done: {} collected, {} fresh, {} unreachable, {} fetch failures, {} other failures",
            summary.run_id, counts.collected, counts.fresh, counts.unreachable, counts.fetch_failed, counts.failed
        );
        Ok(summary)
    }
}

fn failure_reports(failures: Vec<ReconcileFailure>) -> Vec<HostReport> {
    failures
        .into_iter()
        .map(|failure| HostReport {
            position: failure.position,
            address: failure.entry.address,
            identifier: failure.entry.identifier,
            last_update: None,
            outcome: HostOutcome::failed(Stage::Reconcile, &failure.error),
        })
        .collect()
}

fn group_by_identifier(hosts: Vec<(usize, HostRecord)>) -> Vec<Vec<(usize, HostRecord)>> {
    let mut groups: Vec<Vec<(usize, HostRecord)>> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for (position, host) in hosts {
        match slots.get(host.identifier()) {
            Some(&slot) => groups[slot].push((position, host)),
            None => {
                slots.insert(host.identifier().to_string(), groups.len());
                groups.push(vec![(position, host)]);
            }
        }
    }
    groups
}
