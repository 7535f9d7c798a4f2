//! Crate entry point for **websync**.
//!
//! websync keeps a local working directory in sync with a remote git
//! repository over SSH. [`SyncSession`] is the whole API: clone or open,
//! stage, unstage, commit and push, retry a push, pull, close.
//!
//! ```no_run
//! use websync::{SessionConfig, SyncSession};
//!
//! let mut session = SyncSession::clone_into(
//!     "git@example.com:team/notes.git",
//!     "/var/lib/notes",
//!     SessionConfig::default(),
//! );
//! if let Some(cause) = session.failure() {
//!     eprintln!("clone failed: {cause}");
//!     return;
//! }
//! std::fs::write("/var/lib/notes/today.md", "hello").unwrap();
//! session.stage("today.md").unwrap();
//! session.commit_and_push("add today.md").unwrap();
//! session.close().unwrap();
//! ```
//!
//! The `commands` and `progress` modules back the `websync` binary.

mod commands;
mod config;
mod error;
mod git;
mod paths;
mod prepare;
mod progress;
mod session;

pub use commands::{cmd_add, cmd_clone, cmd_pull, cmd_push, cmd_rm, cmd_status};
pub use config::{
    Committer, DEFAULT_BRANCH, DEFAULT_IDENTITY, DEFAULT_REMOTE, DEFAULT_TIMEOUT, IdentitySource,
    KnownHostsPolicy, SessionConfig, TransportConfig, load_config, parse_config,
};
pub use error::{
    CloneError, CommitError, OpenError, PrepareError, PullError, PushError, SessionFailure,
    StageError, SyncError, UnstageError,
};
pub use git::{Backend, CommitId, Git2Backend, PullOutcome, fingerprint_matches};
pub use paths::{Paths, expand_tilde, paths, websync_home};
pub use prepare::{ReadyDirectory, prepare_dir};
pub use session::{SessionState, SyncSession};
