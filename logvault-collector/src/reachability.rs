//! Reachability probe
//!
//! A single ICMP echo through the platform `ping` binary. No raw sockets, so
//! the collector does not need elevated privileges.

use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;

pub trait Reachability: Send + Sync {
    fn is_reachable(&self, address: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct PingProbe {
    timeout: Duration,
}

impl PingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self, address: &str) -> Command {
        let mut command = Command::new("ping");
        if cfg!(target_os = "windows") {
            command.args(["-n", "1", "-w", &self.timeout.as_millis().to_string(), address]);
        } else if cfg!(target_os = "macos") {
            // BSD ping takes the wait time in milliseconds.
            command.args(["-c", "1", "-W", &self.timeout.as_millis().to_string(), address]);
        } else {
            command.args(["-c", "1", "-W", &self.timeout.as_secs().max(1).to_string(), address]);
        }
        command.stdout(Stdio::null()).stderr(Stdio::null());
        command
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl Reachability for PingProbe {
    fn is_reachable(&self, address: &str) -> bool {
        // Keeps option-looking input away from the ping argument parser.
        if address.is_empty() || address.starts_with('-') {
            return false;
        }
        match self.command(address).status() {
            Ok(status) => {
                debug!("ping {} -> {}", address, status);
                status.success()
            }
            Err(e) => {
                debug!("ping {} could not run: {}", address, e);
                false
            }
        }
    }
}
