//! Logvault collector - periodic log harvesting for a fleet of hosts
//!
//! For every host listed in the fleet definition the collector:
//! - Keeps a `last_update` marker in the host's storage directory
//! - Pulls the remote `/var/log` tree over SFTP once the marker is stale
//! - Seals fetched files into a monthly `YYYY_MM.tgz` archive
//! - Purges leftovers of interrupted runs from fresh hosts

pub mod archive;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fleet;
pub mod host;
pub mod marker;
pub mod orchestrator;
pub mod reachability;
pub mod transport;

pub use config::CollectorConfig;
pub use credentials::{CredentialProvider, Credentials};
pub use error::{CollectorError, Result};
pub use fleet::FleetEntry;
pub use host::HostRecord;
pub use orchestrator::{Collector, HostOutcome, HostReport, RunSummary};
pub use reachability::Reachability;
pub use transport::{FetchReport, Transport};
