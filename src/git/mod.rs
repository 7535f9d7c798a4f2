//! Git integration layer.
//!
//! [`Backend`] is the slice of a version-control engine that a session
//! consumes: clone, open, add, remove, commit, push and pull. The production
//! implementation is [`Git2Backend`] (based on the `git2` crate); sessions are
//! generic over the trait so the lifecycle can be driven by other engines.

mod git2_backend;
mod transport;

use std::fmt;
use std::path::Path;

use crate::config::SessionConfig;
use crate::error::{CloneError, CommitError, OpenError, PullError, PushError, StageError, UnstageError};
use crate::prepare::ReadyDirectory;

pub use git2_backend::Git2Backend;
pub use transport::fingerprint_matches;

/// Hex id of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(String);

impl CommitId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<git2::Oid> for CommitId {
    fn from(oid: git2::Oid) -> Self {
        CommitId(oid.to_string())
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        CommitId(s)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a successful pull did to the local branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nothing new on the remote, or the remote branch does not exist yet.
    UpToDate,
    /// The local branch moved to the remote tip.
    FastForwarded { head: CommitId },
    /// Local and remote diverged and a merge commit was created.
    Merged { head: CommitId },
}

/// Operations a session needs from a version-control engine.
///
/// A handle is exclusively owned by one session. Network operations take the
/// whole [`SessionConfig`] for the remote alias, branch and transport.
pub trait Backend {
    type Handle;

    /// Clone `url` into the freshly prepared `dir`, leaving HEAD on
    /// `config.default_branch`.
    fn clone_into(
        &self,
        url: &str,
        dir: &ReadyDirectory,
        config: &SessionConfig,
    ) -> Result<Self::Handle, CloneError>;

    /// Open the repository whose metadata lives in `dir/.git`.
    fn open(&self, dir: &Path) -> Result<Self::Handle, OpenError>;

    fn add(&self, handle: &mut Self::Handle, pathspec: &str) -> Result<(), StageError>;

    fn remove(&self, handle: &mut Self::Handle, pathspec: &str) -> Result<(), UnstageError>;

    fn commit(
        &self,
        handle: &mut Self::Handle,
        message: &str,
        config: &SessionConfig,
    ) -> Result<CommitId, CommitError>;

    fn push(&self, handle: &mut Self::Handle, config: &SessionConfig) -> Result<(), PushError>;

    fn pull(
        &self,
        handle: &mut Self::Handle,
        config: &SessionConfig,
    ) -> Result<PullOutcome, PullError>;

    /// Commit HEAD points to, `None` on an unborn branch.
    fn head(&self, handle: &Self::Handle) -> Option<CommitId>;

    /// Release the handle and everything it holds.
    fn close(&self, handle: Self::Handle) {
        drop(handle);
    }
}
