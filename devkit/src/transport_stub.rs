/*!
Mock transport and reachability probe for collector tests

`MockTransport` plays the remote side: instead of an SFTP session it writes a
configured log tree into the host directory and records every call.
`MockProbe` answers reachability from a fixed set of addresses.
*/

use logvault_collector::transport::{FetchIssue, FetchReport, Transport};
use logvault_collector::{CollectorError, Credentials, Reachability};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Remote tree served by default: a small `/var/log`.
pub fn sample_log_tree() -> Vec<(PathBuf, Vec<u8>)> {
    vec![
        (PathBuf::from("syslog"), b"Jun 18 04:02:11 alpha systemd[1]: Started cron.\n".to_vec()),
        (PathBuf::from("auth.log"), b"Jun 18 04:05:00 alpha sshd[812]: Accepted password\n".to_vec()),
        (PathBuf::from("apt/history.log"), b"Start-Date: 2024-06-17  Install: curl\n".to_vec()),
        (PathBuf::from("nginx/access.log"), b"10.0.0.1 - - \"GET / HTTP/1.1\" 200\n".to_vec()),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub address: String,
    pub username: String,
    pub remote_root: String,
    pub local_root: PathBuf,
}

/// How a host misbehaves when fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Password rejected before anything is transferred
    Authentication,
    /// Connection refused before anything is transferred
    Transport,
    /// First file lands locally, then the connection drops
    Interrupted,
}

#[derive(Clone)]
pub struct MockTransport {
    tree: Arc<Mutex<Vec<(PathBuf, Vec<u8>)>>>,
    failures: Arc<Mutex<HashMap<String, FailureMode>>>,
    unreadable: Arc<Mutex<Vec<String>>>,
    calls: Arc<Mutex<Vec<FetchCall>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_tree(sample_log_tree())
    }

    pub fn with_tree(tree: Vec<(PathBuf, Vec<u8>)>) -> Self {
        Self {
            tree: Arc::new(Mutex::new(tree)),
            failures: Arc::new(Mutex::new(HashMap::new())),
            unreadable: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replaces the tree served to every host.
    pub fn set_tree(&self, tree: Vec<(PathBuf, Vec<u8>)>) {
        *self.tree.lock().unwrap() = tree;
    }

    pub fn fail_host(&self, address: &str, mode: FailureMode) {
        self.failures.lock().unwrap().insert(address.to_string(), mode);
    }

    pub fn recover_host(&self, address: &str) {
        self.failures.lock().unwrap().remove(address);
    }

    /// Remote entry reported as skipped (permission denied) on every fetch.
    pub fn add_unreadable(&self, remote_path: &str) {
        self.unreadable.lock().unwrap().push(remote_path.to_string());
    }

    pub fn get_calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_fetched_addresses(&self) -> Vec<String> {
        self.get_calls().into_iter().map(|c| c.address).collect()
    }

    fn write_file(local_root: &Path, relative: &Path, content: &[u8]) -> std::io::Result<()> {
        let target = local_root.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, content)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn fetch_tree(
        &self,
        address: &str,
        credentials: &Credentials,
        remote_root: &str,
        local_root: &Path,
    ) -> logvault_collector::Result<FetchReport> {
        self.calls.lock().unwrap().push(FetchCall {
            address: address.to_string(),
            username: credentials.username.clone(),
            remote_root: remote_root.to_string(),
            local_root: local_root.to_path_buf(),
        });
        log::info!("[MOCK] fetch {}:{} -> {}", address, remote_root, local_root.display());

        let failure = self.failures.lock().unwrap().get(address).copied();
        let tree = self.tree.lock().unwrap().clone();

        match failure {
            Some(FailureMode::Authentication) => {
                return Err(CollectorError::Authentication {
                    address: address.to_string(),
                    reason: "password rejected".to_string(),
                })
            }
            Some(FailureMode::Transport) => {
                return Err(CollectorError::Transport {
                    address: address.to_string(),
                    reason: "connection refused".to_string(),
                })
            }
            Some(FailureMode::Interrupted) => {
                if let Some((relative, content)) = tree.first() {
                    Self::write_file(local_root, relative, content)
                        .map_err(|e| CollectorError::filesystem(local_root.join(relative), e))?;
                }
                return Err(CollectorError::Transport {
                    address: address.to_string(),
                    reason: "connection reset by peer".to_string(),
                });
            }
            None => {}
        }

        let mut report = FetchReport::default();
        let mut directories = BTreeSet::new();
        for (relative, content) in &tree {
            Self::write_file(local_root, relative, content)
                .map_err(|e| CollectorError::filesystem(local_root.join(relative), e))?;
            report.files += 1;
            report.bytes += content.len() as u64;
            let mut parent = relative.parent();
            while let Some(dir) = parent.filter(|p| !p.as_os_str().is_empty()) {
                directories.insert(dir.to_path_buf());
                parent = dir.parent();
            }
        }
        report.directories = directories.len();
        report.skipped = self
            .unreadable
            .lock()
            .unwrap()
            .iter()
            .map(|path| FetchIssue {
                remote_path: format!("{}/{}", remote_root.trim_end_matches('/'), path),
                reason: "permission denied".to_string(),
            })
            .collect();
        Ok(report)
    }
}

#[derive(Clone, Default)]
pub struct MockProbe {
    reachable: Arc<Mutex<HashSet<String>>>,
    probed: Arc<Mutex<Vec<String>>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, address: &str) {
        self.reachable.lock().unwrap().insert(address.to_string());
    }

    pub fn set_unreachable(&self, address: &str) {
        self.reachable.lock().unwrap().remove(address);
    }

    pub fn get_probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

impl Reachability for MockProbe {
    fn is_reachable(&self, address: &str) -> bool {
        self.probed.lock().unwrap().push(address.to_string());
        self.reachable.lock().unwrap().contains(address)
    }
}
