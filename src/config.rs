use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths::paths;

/// Remote alias used for every push and pull.
pub const DEFAULT_REMOTE: &str = "origin";
/// Branch pushed to and pulled from.
pub const DEFAULT_BRANCH: &str = "master";
/// Network operations are aborted after this long unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Private key offered when no identity is configured.
pub const DEFAULT_IDENTITY: &str = "~/.ssh/id_rsa";

/// Everything a [`SyncSession`](crate::SyncSession) needs besides the paths.
///
/// Loaded from `config.toml`; every key is optional.
///
/// Example TOML:
/// ```toml
/// remote = "origin"
/// branch = "main"
///
/// [committer]
/// name  = "sync-bot"
/// email = "sync@example.com"
///
/// [transport]
/// timeout_secs = 30
///
/// [transport.identity]
/// kind        = "key_file"
/// private_key = "~/.ssh/id_ed25519"
///
/// [transport.known_hosts]
/// policy = "pinned"
/// sha256 = ["9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "remote")]
    pub remote_name: String,
    #[serde(rename = "branch")]
    pub default_branch: String,
    /// Falls back to the repository's `user.name`/`user.email`.
    pub committer: Option<Committer>,
    pub transport: TransportConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            remote_name: DEFAULT_REMOTE.to_string(),
            default_branch: DEFAULT_BRANCH.to_string(),
            committer: None,
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

/// Authenticated transport setup shared by clone, push and pull.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub identity: IdentitySource,
    pub known_hosts: KnownHostsPolicy,
    /// `timeout_secs = 0` disables the deadline.
    #[serde(rename = "timeout_secs", deserialize_with = "timeout_from_secs")]
    pub timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            identity: IdentitySource::default(),
            known_hosts: KnownHostsPolicy::default(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

fn timeout_from_secs<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    let secs = u64::deserialize(d)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

/// Where SSH credentials come from.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentitySource {
    /// A private key on disk. A leading `~` is expanded from `$HOME`.
    KeyFile {
        private_key: PathBuf,
        #[serde(default)]
        public_key: Option<PathBuf>,
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Keys held by a running ssh-agent.
    Agent,
}

impl Default for IdentitySource {
    fn default() -> Self {
        IdentitySource::KeyFile {
            private_key: PathBuf::from(DEFAULT_IDENTITY),
            public_key: None,
            passphrase: None,
        }
    }
}

impl fmt::Debug for IdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentitySource::KeyFile {
                private_key,
                public_key,
                passphrase,
            } => f
                .debug_struct("KeyFile")
                .field("private_key", private_key)
                .field("public_key", public_key)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            IdentitySource::Agent => f.write_str("Agent"),
        }
    }
}

/// How the SSH host key of the remote is verified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum KnownHostsPolicy {
    /// libgit2 checks the key against the user's `known_hosts`.
    #[default]
    KnownHosts,
    /// Only keys whose SHA-256 fingerprint (hex) is listed are trusted.
    Pinned { sha256: Vec<String> },
    /// Every host key is trusted. Insecure.
    AcceptAny,
}

/// Parse a `config.toml` document.
pub fn parse_config(txt: &str) -> Result<SessionConfig> {
    toml::from_str(txt).context("failed to parse config.toml")
}

/// Load the session configuration.
///
/// With `Some(path)` the file must exist. With `None` the default location
/// from [`paths()`] is used, and a missing file yields
/// [`SessionConfig::default`].
///
/// # Errors
/// - The file cannot be read.
/// - The TOML does not match [`SessionConfig`].
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = paths()?.config;
            if !p.exists() {
                return Ok(SessionConfig::default());
            }
            p
        }
    };
    let txt = fs::read_to_string(&path)
        .with_context(|| format!("config not found: {}", path.display()))?;
    parse_config(&txt).with_context(|| format!("in {}", path.display()))
}
