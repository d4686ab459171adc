//! Credential acquisition for remote hosts
//!
//! Handles:
//! - Interactive prompting, once per host (the historical behaviour)
//! - Secrets stored in the OS keyring, one entry per host identifier
//! - Environment / config provided credentials for unattended runs, read per
//!   host at lookup time

use crate::error::{CollectorError, Result};
use crate::host::HostRecord;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

pub const KEYRING_SERVICE: &str = "logvault-collector";
pub const ENV_USER: &str = "LOGVAULT_SSH_USER";
pub const ENV_PASSWORD: &str = "LOGVAULT_SSH_PASSWORD";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials for a host right before it is fetched.
pub trait CredentialProvider: Send + Sync {
    fn credentials(&self, host: &HostRecord) -> Result<Credentials>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    #[default]
    Prompt,
    Keyring,
    Env,
}

/// Asks on the terminal. Prompts are serialised so parallel workers do not
/// interleave their questions.
#[derive(Default)]
pub struct PromptCredentials {
    default_username: Option<String>,
    terminal: Mutex<()>,
}

impl PromptCredentials {
    pub fn new(default_username: Option<String>) -> Self {
        Self {
            default_username,
            terminal: Mutex::new(()),
        }
    }

    fn prompt(question: &str) -> io::Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{question}: ")?;
        stderr.flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl CredentialProvider for PromptCredentials {
    fn credentials(&self, host: &HostRecord) -> Result<Credentials> {
        let _guard = self.terminal.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let prompt_err = |e: io::Error| CollectorError::Credentials {
            host: host.identifier().to_string(),
            reason: format!("terminal prompt failed: {e}"),
        };

        let question = match &self.default_username {
            Some(default) => format!("Local administrator user for host {} [{}]", host.identifier(), default),
            None => format!("Local administrator user for host {}", host.identifier()),
        };
        let mut username = Self::prompt(&question).map_err(prompt_err)?;
        if username.is_empty() {
            username = self.default_username.clone().unwrap_or_default();
        }
        if username.is_empty() {
            return Err(CollectorError::Credentials {
                host: host.identifier().to_string(),
                reason: "no username given".to_string(),
            });
        }

        let secret = Self::prompt(&format!("Password for {} on host {}", username, host.identifier()))
            .map_err(prompt_err)?;
        Ok(Credentials::new(username, secret))
    }
}

/// Reads the per-host secret from the OS keyring.
pub struct KeyringCredentials {
    username: String,
}

impl KeyringCredentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    fn entry(identifier: &str) -> keyring::Result<Entry> {
        Entry::new(KEYRING_SERVICE, identifier)
    }

    /// Stores the secret of `identifier` in the OS keyring.
    pub fn store_secret(identifier: &str, secret: &str) -> Result<()> {
        Self::entry(identifier)
            .and_then(|entry| entry.set_password(secret))
            .map_err(|e| CollectorError::Credentials {
                host: identifier.to_string(),
                reason: format!("keyring write failed: {e}"),
            })
    }

    /// Removes the secret of `identifier` from the OS keyring.
    pub fn delete_secret(identifier: &str) -> Result<()> {
        Self::entry(identifier)
            .and_then(|entry| entry.delete_credential())
            .map_err(|e| CollectorError::Credentials {
                host: identifier.to_string(),
                reason: format!("keyring delete failed: {e}"),
            })
    }
}

impl CredentialProvider for KeyringCredentials {
    fn credentials(&self, host: &HostRecord) -> Result<Credentials> {
        let secret = Self::entry(host.identifier())
            .and_then(|entry| entry.get_password())
            .map_err(|e| CollectorError::Credentials {
                host: host.identifier().to_string(),
                reason: format!("keyring lookup failed: {e}"),
            })?;
        Ok(Credentials::new(self.username.clone(), secret))
    }
}

/// Same credentials for every host.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credentials(&self, _host: &HostRecord) -> Result<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Reads `LOGVAULT_SSH_USER` (or the configured user) and
/// `LOGVAULT_SSH_PASSWORD` each time a host needs them, so a missing
/// variable fails that host only.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    fallback_user: Option<String>,
    user_var: String,
    password_var: String,
}

impl EnvCredentials {
    pub fn new(fallback_user: Option<String>) -> Self {
        Self::with_vars(fallback_user, ENV_USER, ENV_PASSWORD)
    }

    pub fn with_vars(fallback_user: Option<String>, user_var: &str, password_var: &str) -> Self {
        Self {
            fallback_user,
            user_var: user_var.to_string(),
            password_var: password_var.to_string(),
        }
    }
}

impl CredentialProvider for EnvCredentials {
    fn credentials(&self, host: &HostRecord) -> Result<Credentials> {
        let missing = |reason: String| CollectorError::Credentials {
            host: host.identifier().to_string(),
            reason,
        };
        let username = std::env::var(&self.user_var)
            .ok()
            .or_else(|| self.fallback_user.clone())
            .ok_or_else(|| missing(format!("{} is not set and no username is configured", self.user_var)))?;
        let secret = std::env::var(&self.password_var).map_err(|_| missing(format!("{} is not set", self.password_var)))?;
        Ok(Credentials::new(username, secret))
    }
}
