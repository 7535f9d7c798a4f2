use std::cell::Cell;
use std::time::{Duration, Instant};

use git2::{
    CertificateCheckStatus, Cred, CredentialType, Error, ErrorClass, ErrorCode, RemoteCallbacks,
    cert::Cert,
};
use tracing::{debug, warn};

use crate::config::{IdentitySource, KnownHostsPolicy, TransportConfig};
use crate::paths::expand_tilde;

/// User name offered when the URL carries none (`host:path.git`).
const DEFAULT_SSH_USER: &str = "git";

/// Wall-clock limit for one network operation.
///
/// git2 has no per-operation timeout, so the deadline is checked from every
/// transport callback and trips the operation by making the callback fail.
pub(crate) struct Deadline {
    start: Instant,
    limit: Option<Duration>,
    tripped: Cell<bool>,
}

impl Deadline {
    pub(crate) fn new(limit: Option<Duration>) -> Self {
        Deadline {
            start: Instant::now(),
            limit,
            tripped: Cell::new(false),
        }
    }

    /// `true` while time remains. Once it returns `false` it keeps doing so.
    pub(crate) fn check(&self) -> bool {
        if self.tripped.get() {
            return false;
        }
        match self.limit {
            Some(limit) if self.start.elapsed() >= limit => {
                self.tripped.set(true);
                false
            }
            _ => true,
        }
    }

    pub(crate) fn tripped(&self) -> bool {
        self.tripped.get()
    }

    pub(crate) fn error(&self) -> Error {
        let secs = self.limit.map(|l| l.as_secs()).unwrap_or_default();
        Error::new(
            ErrorCode::User,
            ErrorClass::Net,
            format!("operation timed out after {}s", secs),
        )
    }
}

/// How a failed network operation should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Auth,
    Network,
    Rejected,
    Other,
}

/// Sort a git2 error into the buckets callers react to differently.
pub(crate) fn classify(err: &Error, deadline: &Deadline) -> Failure {
    if deadline.tripped() {
        return Failure::Network;
    }
    match err.code() {
        ErrorCode::Auth | ErrorCode::Certificate => return Failure::Auth,
        ErrorCode::NotFastForward => return Failure::Rejected,
        _ => {}
    }
    match err.class() {
        ErrorClass::Ssh if err.message().to_ascii_lowercase().contains("auth") => Failure::Auth,
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl | ErrorClass::Os => {
            Failure::Network
        }
        _ => Failure::Other,
    }
}

/// Build callbacks wired to the transport configuration and `deadline`.
///
/// Credentials are offered once; libgit2 asking again means they were
/// rejected, and the operation fails with an auth error instead of looping.
pub(crate) fn remote_callbacks<'a>(
    transport: &'a TransportConfig,
    deadline: &'a Deadline,
) -> RemoteCallbacks<'a> {
    let offered = Cell::new(false);
    let mut cb = RemoteCallbacks::new();

    cb.credentials(move |url, username_from_url, allowed| {
        if !deadline.check() {
            return Err(deadline.error());
        }
        let user = username_from_url.unwrap_or(DEFAULT_SSH_USER);
        if allowed.contains(CredentialType::USERNAME) {
            return Cred::username(user);
        }
        if offered.replace(true) {
            return Err(Error::new(
                ErrorCode::Auth,
                ErrorClass::Ssh,
                format!("credentials for {}@{} were rejected", user, url),
            ));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            debug!(url, user, "offering ssh credentials");
            return match &transport.identity {
                IdentitySource::Agent => Cred::ssh_key_from_agent(user),
                IdentitySource::KeyFile {
                    private_key,
                    public_key,
                    passphrase,
                } => {
                    let private_key = expand_tilde(private_key);
                    let public_key = public_key.as_deref().map(expand_tilde);
                    Cred::ssh_key(
                        user,
                        public_key.as_deref(),
                        &private_key,
                        passphrase.as_deref(),
                    )
                }
            };
        }
        if allowed.contains(CredentialType::DEFAULT) {
            return Cred::default();
        }
        Err(Error::new(
            ErrorCode::Auth,
            ErrorClass::Net,
            format!("{} requires an unsupported credential type", url),
        ))
    });

    cb.certificate_check(move |cert, host| {
        if !deadline.check() {
            return Err(deadline.error());
        }
        check_host(&transport.known_hosts, cert, host)
    });

    cb.transfer_progress(move |_stats| deadline.check());
    cb.sideband_progress(move |_data| deadline.check());
    cb
}

fn check_host(
    policy: &KnownHostsPolicy,
    cert: &Cert<'_>,
    host: &str,
) -> Result<CertificateCheckStatus, Error> {
    match policy {
        KnownHostsPolicy::KnownHosts => Ok(CertificateCheckStatus::CertificatePassthrough),
        KnownHostsPolicy::AcceptAny => {
            warn!(host, "accepting host key without verification");
            Ok(CertificateCheckStatus::CertificateOk)
        }
        KnownHostsPolicy::Pinned { sha256 } => {
            let Some(hostkey) = cert.as_hostkey() else {
                // TLS certificates are left to libgit2.
                return Ok(CertificateCheckStatus::CertificatePassthrough);
            };
            let Some(hash) = hostkey.hash_sha256() else {
                return Err(Error::new(
                    ErrorCode::Certificate,
                    ErrorClass::Ssh,
                    format!("no SHA-256 host key fingerprint available for {}", host),
                ));
            };
            if fingerprint_matches(sha256, hash) {
                Ok(CertificateCheckStatus::CertificateOk)
            } else {
                Err(Error::new(
                    ErrorCode::Certificate,
                    ErrorClass::Ssh,
                    format!(
                        "host key for {} (sha256 {}) is not pinned",
                        host,
                        hex::encode(hash)
                    ),
                ))
            }
        }
    }
}

/// Whether `hash` matches one of `pins`.
///
/// Pins are hex, case-insensitive, and may use `:` separators
/// (`ab:cd:...`).
pub fn fingerprint_matches(pins: &[String], hash: &[u8]) -> bool {
    let actual = hex::encode(hash);
    pins.iter().any(|pin| {
        let normalized: String = pin
            .chars()
            .filter(|c| *c != ':')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        hex::decode(&normalized).is_ok() && normalized == actual
    })
}
