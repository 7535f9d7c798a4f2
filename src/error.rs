//! Error types for every stage of the sync lifecycle.
//!
//! Construction errors ([`CloneError`], [`OpenError`]) are recorded on the
//! session and make it permanently unusable. Per-operation errors are wrapped
//! in [`SyncError`] and leave the session usable.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::git::CommitId;

/// The local directory could not be made ready for a clone.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to reset non-empty directory {}: {source}", .path.display())]
    ResetFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} exists and is not a directory", .path.display())]
    NotADirectory { path: PathBuf },
}

/// A clone aborted before a usable repository existed.
#[derive(Debug, Error)]
pub enum CloneError {
    #[error(transparent)]
    DirectoryPrepareFailed(#[from] PrepareError),

    #[error("transport failure while cloning {url}: {source}")]
    TransportFailed {
        url: String,
        #[source]
        source: git2::Error,
    },

    #[error("failed to clone {url}: {source}")]
    ProtocolFailed {
        url: String,
        #[source]
        source: git2::Error,
    },
}

/// The local path is not a valid existing repository.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("no usable repository at {}: {source}", .path.display())]
    MetadataMissingOrCorrupt {
        path: PathBuf,
        #[source]
        source: git2::Error,
    },
}

#[derive(Debug, Error)]
#[error("failed to stage '{pathspec}': {source}")]
pub struct StageError {
    pub pathspec: String,
    #[source]
    pub source: git2::Error,
}

#[derive(Debug, Error)]
#[error("failed to remove '{pathspec}': {source}")]
pub struct UnstageError {
    pub pathspec: String,
    #[source]
    pub source: git2::Error,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("nothing to commit")]
    NothingToCommit,

    #[error("failed to commit '{message}': {source}")]
    Failed {
        message: String,
        #[source]
        source: git2::Error,
    },
}

/// The remote was not updated.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("authentication to {remote} failed: {source}")]
    AuthFailed {
        remote: String,
        #[source]
        source: git2::Error,
    },

    #[error("network failure pushing to {remote}: {source}")]
    NetworkFailed {
        remote: String,
        #[source]
        source: git2::Error,
    },

    #[error("push to {remote} rejected: {reason}")]
    Rejected { remote: String, reason: String },

    /// Local or configuration problem, such as an unknown remote alias.
    #[error("failed to push to {remote}: {source}")]
    Failed {
        remote: String,
        #[source]
        source: git2::Error,
    },
}

/// Remote changes were not (fully) integrated. The working copy is left as
/// git2 left it, which for [`PullError::MergeConflict`] means mid-merge.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("authentication to {remote} failed: {source}")]
    AuthFailed {
        remote: String,
        #[source]
        source: git2::Error,
    },

    #[error("network failure pulling from {remote}: {source}")]
    NetworkFailed {
        remote: String,
        #[source]
        source: git2::Error,
    },

    #[error("merge conflict in {}", .paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    #[error("failed to integrate changes from {remote}: {source}")]
    Failed {
        remote: String,
        #[source]
        source: git2::Error,
    },
}

/// Why a session never became ready.
#[derive(Debug, Error)]
pub enum SessionFailure {
    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error(transparent)]
    Open(#[from] OpenError),
}

/// Error returned by every [`SyncSession`](crate::SyncSession) operation.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{op}: session is not ready")]
    SessionNotReady { op: &'static str },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Unstage(#[from] UnstageError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    /// The commit exists locally; only the remote update failed.
    #[error("committed {commit} locally but push failed: {source}")]
    PushAfterCommit {
        commit: CommitId,
        #[source]
        source: PushError,
    },

    #[error(transparent)]
    Push(#[from] PushError),

    #[error(transparent)]
    Pull(#[from] PullError),
}

impl SyncError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SyncError::SessionNotReady { .. })
    }
}
