//! Remote transport: recursive tree retrieval over SFTP
//!
//! `Transport` is the seam the orchestrator talks to; `SftpTransport` is the
//! production implementation on top of libssh2.

use crate::credentials::Credentials;
use crate::error::{CollectorError, Result};
use ssh2::{HashType, Session, Sftp};
use std::fs::{self, File};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one `fetch_tree` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    /// Remote entries that could be neither copied nor walked.
    pub skipped: Vec<FetchIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchIssue {
    pub remote_path: String,
    pub reason: String,
}

impl FetchReport {
    pub fn items(&self) -> usize {
        self.files + self.directories
    }

    fn merge(&mut self, other: FetchReport) {
        self.files += other.files;
        self.directories += other.directories;
        self.bytes += other.bytes;
        self.skipped.extend(other.skipped);
    }
}

/// Retrieves a remote directory tree into a local directory.
///
/// An `Err` means nothing usable was fetched (connection, authentication or
/// listing of the root failed). Per-entry problems are reported in
/// `FetchReport::skipped` instead.
pub trait Transport: Send + Sync {
    fn fetch_tree(
        &self,
        address: &str,
        credentials: &Credentials,
        remote_root: &str,
        local_root: &Path,
    ) -> Result<FetchReport>;
}

#[derive(Debug, Clone)]
pub struct SftpTransport {
    port: u16,
    timeout: Duration,
}

impl SftpTransport {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    fn connect(&self, address: &str, credentials: &Credentials) -> Result<Session> {
        let transport_err = |reason: String| CollectorError::Transport {
            address: address.to_string(),
            reason,
        };

        let socket_addr = (address, self.port)
            .to_socket_addrs()
            .map_err(|e| transport_err(format!("cannot resolve: {e}")))?
            .next()
            .ok_or_else(|| transport_err("address resolved to nothing".to_string()))?;
        let tcp = TcpStream::connect_timeout(&socket_addr, self.timeout)
            .map_err(|e| transport_err(format!("connect to {socket_addr} failed: {e}")))?;

        let mut session = Session::new().map_err(|e| transport_err(e.to_string()))?;
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| transport_err(format!("SSH handshake failed: {e}")))?;

        if let Some(hash) = session.host_key_hash(HashType::Sha256) {
            let fingerprint: String = hash.iter().map(|b| format!("{b:02x}")).collect();
            debug!("Host key of {} (sha256): {}", address, fingerprint);
        }

        session
            .userauth_password(&credentials.username, credentials.secret())
            .map_err(|e| CollectorError::Authentication {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        if !session.authenticated() {
            return Err(CollectorError::Authentication {
                address: address.to_string(),
                reason: format!("server rejected user {}", credentials.username),
            });
        }

        Ok(session)
    }
}

impl Transport for SftpTransport {
    fn fetch_tree(
        &self,
        address: &str,
        credentials: &Credentials,
        remote_root: &str,
        local_root: &Path,
    ) -> Result<FetchReport> {
        let session = self.connect(address, credentials)?;
        let sftp = session.sftp().map_err(|e| CollectorError::Transport {
            address: address.to_string(),
            reason: format!("cannot open SFTP channel: {e}"),
        })?;

        // The root listing must succeed, otherwise the fetch failed as a whole.
        let root_entries = sftp.readdir(Path::new(remote_root)).map_err(|e| CollectorError::Transport {
            address: address.to_string(),
            reason: format!("cannot list {remote_root}: {e}"),
        })?;

        let report = recursive_get(&sftp, root_entries, local_root);
        info!(
            "Fetched {} files / {} directories ({} bytes) from {}:{}, {} skipped",
            report.files,
            report.directories,
            report.bytes,
            address,
            remote_root,
            report.skipped.len()
        );
        Ok(report)
    }
}

/// Walks `entries`: directories recurse, everything else is copied as a
/// file. A failed copy is retried as a directory before giving up.
fn recursive_get(sftp: &Sftp, entries: Vec<(PathBuf, ssh2::FileStat)>, local_dir: &Path) -> FetchReport {
    let mut report = FetchReport::default();

    for (remote_path, stat) in entries {
        let Some(name) = remote_path.file_name() else {
            continue;
        };
        let local_path = local_dir.join(name);

        if stat.is_dir() {
            report.merge(get_directory(sftp, &remote_path, &local_path));
            continue;
        }

        match copy_file(sftp, &remote_path, &local_path) {
            Ok(bytes) => {
                report.files += 1;
                report.bytes += bytes;
            }
            Err(copy_err) => {
                let _ = fs::remove_file(&local_path);
                match sftp.readdir(&remote_path) {
                    Ok(children) => {
                        debug!("{} is not a plain file, walking it as a directory", remote_path.display());
                        report.merge(descend(sftp, &remote_path, children, &local_path));
                    }
                    Err(_) => {
                        warn!("Skipping {}: {}", remote_path.display(), copy_err);
                        report.skipped.push(FetchIssue {
                            remote_path: remote_path.display().to_string(),
                            reason: copy_err.to_string(),
                        });
                    }
                }
            }
        }
    }

    report
}

fn get_directory(sftp: &Sftp, remote_path: &Path, local_path: &Path) -> FetchReport {
    match sftp.readdir(remote_path) {
        Ok(children) => descend(sftp, remote_path, children, local_path),
        Err(e) => {
            warn!("Cannot list {}: {}", remote_path.display(), e);
            FetchReport {
                skipped: vec![FetchIssue {
                    remote_path: remote_path.display().to_string(),
                    reason: e.to_string(),
                }],
                ..FetchReport::default()
            }
        }
    }
}

fn descend(
    sftp: &Sftp,
    remote_path: &Path,
    children: Vec<(PathBuf, ssh2::FileStat)>,
    local_path: &Path,
) -> FetchReport {
    if let Err(e) = fs::create_dir_all(local_path) {
        return FetchReport {
            skipped: vec![FetchIssue {
                remote_path: remote_path.display().to_string(),
                reason: format!("cannot create {}: {e}", local_path.display()),
            }],
            ..FetchReport::default()
        };
    }
    let mut report = recursive_get(sftp, children, local_path);
    report.directories += 1;
    report
}

fn copy_file(sftp: &Sftp, remote_path: &Path, local_path: &Path) -> io::Result<u64> {
    let mut remote = sftp.open(remote_path).map_err(io::Error::from)?;
    let mut local = File::create(local_path)?;
    io::copy(&mut remote, &mut local)
}
