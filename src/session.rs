//! The stateful handle bound to one local directory and its remote.
//!
//! A [`SyncSession`] is built by cloning or by opening an existing checkout.
//! Construction never fails outright: a session whose setup went wrong is
//! kept in the failed state and rejects every operation with
//! [`SyncError::SessionNotReady`]. Operations block until git2 returns and
//! must be called sequentially; wrap the session in a `Mutex` to share it.

use std::mem;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{CloneError, PullError, SessionFailure, SyncError};
use crate::git::{Backend, CommitId, Git2Backend, PullOutcome};
use crate::prepare::prepare_dir;

#[derive(Debug)]
pub enum SessionState<H> {
    Ready(H),
    Failed(SessionFailure),
    Closed,
}

pub struct SyncSession<B: Backend = Git2Backend> {
    backend: B,
    config: SessionConfig,
    path: PathBuf,
    state: SessionState<B::Handle>,
    initial_pull: Option<Result<PullOutcome, PullError>>,
}

impl SyncSession<Git2Backend> {
    /// Reset `local_path` and clone `remote_url` into it.
    pub fn clone_into(
        remote_url: &str,
        local_path: impl AsRef<Path>,
        config: SessionConfig,
    ) -> Self {
        Self::clone_with(Git2Backend, remote_url, local_path, config)
    }

    /// Open the checkout at `local_path` and pull once.
    pub fn open(local_path: impl AsRef<Path>, config: SessionConfig) -> Self {
        Self::open_with(Git2Backend, local_path, config)
    }
}

impl<B: Backend> SyncSession<B> {
    /// Clone through `backend`. A directory that cannot be prepared fails
    /// the session before the backend is touched; a failed clone leaves the
    /// prepared directory in place.
    pub fn clone_with(
        backend: B,
        remote_url: &str,
        local_path: impl AsRef<Path>,
        config: SessionConfig,
    ) -> Self {
        let path = local_path.as_ref().to_path_buf();
        info!(url = remote_url, path = %path.display(), "cloning");

        let cloned = prepare_dir(&path)
            .map_err(CloneError::from)
            .and_then(|dir| backend.clone_into(remote_url, &dir, &config));
        let state = match cloned {
            Ok(handle) => {
                info!(url = remote_url, path = %path.display(), "clone finished");
                SessionState::Ready(handle)
            }
            Err(e) => {
                error!(error = %e, "clone failed");
                SessionState::Failed(e.into())
            }
        };

        SyncSession {
            backend,
            config,
            path,
            state,
            initial_pull: None,
        }
    }

    /// Open through `backend`, then pull exactly once.
    ///
    /// A failed pull does not fail the open; its outcome is kept in
    /// [`initial_pull`](Self::initial_pull).
    pub fn open_with(backend: B, local_path: impl AsRef<Path>, config: SessionConfig) -> Self {
        let path = local_path.as_ref().to_path_buf();
        let (state, initial_pull) = match backend.open(&path) {
            Ok(mut handle) => {
                info!(path = %path.display(), "opened repository");
                let pulled = backend.pull(&mut handle, &config);
                match &pulled {
                    Ok(outcome) => info!(?outcome, "initial pull"),
                    Err(e) => warn!(error = %e, "initial pull failed"),
                }
                (SessionState::Ready(handle), Some(pulled))
            }
            Err(e) => {
                error!(error = %e, "open failed");
                (SessionState::Failed(e.into()), None)
            }
        };

        SyncSession {
            backend,
            config,
            path,
            state,
            initial_pull,
        }
    }

    /// Mark `file` (a path or pathspec relative to the working tree) for the
    /// next commit.
    pub fn stage(&mut self, file: &str) -> Result<(), SyncError> {
        let handle = ready(&mut self.state, "stage")?;
        info!(file, "staging");
        self.backend.add(handle, file)?;
        Ok(())
    }

    /// Remove `file` from the index and the working tree so the deletion is
    /// part of the next commit.
    pub fn unstage(&mut self, file: &str) -> Result<(), SyncError> {
        let handle = ready(&mut self.state, "unstage")?;
        info!(file, "removing");
        self.backend.remove(handle, file)?;
        Ok(())
    }

    /// Commit the index and push it to the configured branch.
    ///
    /// # Errors
    /// - [`SyncError::Commit`]: nothing was committed and no push was tried.
    /// - [`SyncError::PushAfterCommit`]: the commit exists locally but the
    ///   remote was not updated. Nothing is rolled back or retried.
    pub fn commit_and_push(&mut self, message: &str) -> Result<CommitId, SyncError> {
        let handle = ready(&mut self.state, "commit_and_push")?;
        let commit = self.backend.commit(handle, message, &self.config)?;
        info!(%commit, message, "committed");

        match self.backend.push(handle, &self.config) {
            Ok(()) => {
                info!(
                    %commit,
                    remote = %self.config.remote_name,
                    branch = %self.config.default_branch,
                    "pushed"
                );
                Ok(commit)
            }
            Err(source) => {
                warn!(%commit, error = %source, "push failed, commit kept locally");
                Err(SyncError::PushAfterCommit { commit, source })
            }
        }
    }

    /// Push the configured branch without committing, e.g. to retry after
    /// [`SyncError::PushAfterCommit`] once a pull has integrated the remote.
    pub fn push(&mut self) -> Result<(), SyncError> {
        let handle = ready(&mut self.state, "push")?;
        self.backend.push(handle, &self.config)?;
        info!(branch = %self.config.default_branch, "pushed");
        Ok(())
    }

    /// Fetch the configured branch and integrate it into the working copy.
    pub fn pull(&mut self) -> Result<PullOutcome, SyncError> {
        let handle = ready(&mut self.state, "pull")?;
        let outcome = self.backend.pull(handle, &self.config)?;
        info!(?outcome, "pulled");
        Ok(outcome)
    }

    /// Release the repository handle. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), SyncError> {
        match mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Ready(handle) => {
                self.backend.close(handle);
                info!(path = %self.path.display(), "closed");
                Ok(())
            }
            SessionState::Closed => {
                debug!(path = %self.path.display(), "already closed");
                Ok(())
            }
            failed @ SessionState::Failed(_) => {
                self.state = failed;
                Err(SyncError::SessionNotReady { op: "close" })
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready(_))
    }

    pub fn state(&self) -> &SessionState<B::Handle> {
        &self.state
    }

    /// Why construction failed, if it did.
    pub fn failure(&self) -> Option<&SessionFailure> {
        match &self.state {
            SessionState::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Result of the pull performed by [`open_with`](Self::open_with).
    /// Callers that need an up-to-date checkout must check it.
    pub fn initial_pull(&self) -> Option<&Result<PullOutcome, PullError>> {
        self.initial_pull.as_ref()
    }

    /// Commit HEAD points to; `Ok(None)` on an unborn branch.
    pub fn head_commit(&self) -> Result<Option<CommitId>, SyncError> {
        match &self.state {
            SessionState::Ready(handle) => Ok(self.backend.head(handle)),
            _ => Err(SyncError::SessionNotReady { op: "head_commit" }),
        }
    }

    pub fn handle(&self) -> Option<&B::Handle> {
        match &self.state {
            SessionState::Ready(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl<B: Backend> Drop for SyncSession<B> {
    fn drop(&mut self) {
        if let SessionState::Ready(handle) = mem::replace(&mut self.state, SessionState::Closed) {
            self.backend.close(handle);
        }
    }
}

fn ready<'a, H>(state: &'a mut SessionState<H>, op: &'static str) -> Result<&'a mut H, SyncError> {
    match state {
        SessionState::Ready(handle) => Ok(handle),
        _ => {
            debug!(op, "rejected: session not ready");
            Err(SyncError::SessionNotReady { op })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommitError, OpenError, PushError, StageError, UnstageError};
    use crate::prepare::ReadyDirectory;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::tempdir;

    /// Records how often each engine call happens.
    #[derive(Default)]
    struct Counting {
        clones: Cell<usize>,
        opens: Cell<usize>,
        adds: Cell<usize>,
        removes: Cell<usize>,
        commits: Cell<usize>,
        pushes: Cell<usize>,
        pulls: Cell<usize>,
        closes: Rc<Cell<usize>>,
        fail_open: bool,
        fail_pull: bool,
        fail_push: bool,
        nothing_to_commit: bool,
    }

    fn bump(c: &Cell<usize>) {
        c.set(c.get() + 1);
    }

    fn engine_error(msg: &str) -> git2::Error {
        git2::Error::from_str(msg)
    }

    impl Backend for Counting {
        type Handle = Vec<String>;

        fn clone_into(
            &self,
            _url: &str,
            _dir: &ReadyDirectory,
            _config: &SessionConfig,
        ) -> Result<Self::Handle, CloneError> {
            bump(&self.clones);
            Ok(Vec::new())
        }

        fn open(&self, dir: &Path) -> Result<Self::Handle, OpenError> {
            bump(&self.opens);
            if self.fail_open {
                return Err(OpenError::MetadataMissingOrCorrupt {
                    path: dir.to_path_buf(),
                    source: engine_error("no .git"),
                });
            }
            Ok(Vec::new())
        }

        fn add(&self, handle: &mut Self::Handle, pathspec: &str) -> Result<(), StageError> {
            bump(&self.adds);
            handle.push(format!("add {}", pathspec));
            Ok(())
        }

        fn remove(&self, handle: &mut Self::Handle, pathspec: &str) -> Result<(), UnstageError> {
            bump(&self.removes);
            handle.push(format!("rm {}", pathspec));
            Ok(())
        }

        fn commit(
            &self,
            handle: &mut Self::Handle,
            message: &str,
            _config: &SessionConfig,
        ) -> Result<CommitId, CommitError> {
            bump(&self.commits);
            if self.nothing_to_commit {
                return Err(CommitError::NothingToCommit);
            }
            handle.push(format!("commit {}", message));
            Ok(CommitId::from(format!("c{}", self.commits.get())))
        }

        fn push(&self, _handle: &mut Self::Handle, config: &SessionConfig) -> Result<(), PushError> {
            bump(&self.pushes);
            if self.fail_push {
                return Err(PushError::Rejected {
                    remote: config.remote_name.clone(),
                    reason: "non-fast-forward".into(),
                });
            }
            Ok(())
        }

        fn pull(
            &self,
            _handle: &mut Self::Handle,
            config: &SessionConfig,
        ) -> Result<PullOutcome, PullError> {
            bump(&self.pulls);
            if self.fail_pull {
                return Err(PullError::NetworkFailed {
                    remote: config.remote_name.clone(),
                    source: engine_error("unreachable"),
                });
            }
            Ok(PullOutcome::UpToDate)
        }

        fn head(&self, handle: &Self::Handle) -> Option<CommitId> {
            handle
                .iter()
                .filter(|op| op.starts_with("commit"))
                .count()
                .checked_sub(1)
                .map(|n| CommitId::from(format!("c{}", n + 1)))
        }

        fn close(&self, _handle: Self::Handle) {
            bump(&self.closes);
        }
    }

    fn failed_clone() -> SyncSession<Counting> {
        let td = tempdir().unwrap();
        let file = td.path().join("occupied");
        fs::write(&file, "x").unwrap();
        SyncSession::clone_with(
            Counting::default(),
            "git@example.com:repo.git",
            &file,
            SessionConfig::default(),
        )
    }

    #[test]
    fn clone_into_unusable_path_never_reaches_backend() {
        let s = failed_clone();

        assert!(!s.is_ready());
        assert_eq!(s.backend().clones.get(), 0);
        assert!(matches!(
            s.failure(),
            Some(SessionFailure::Clone(CloneError::DirectoryPrepareFailed(_)))
        ));
    }

    #[test]
    fn failed_session_rejects_every_operation() {
        let mut s = failed_clone();

        assert!(s.stage("a.txt").unwrap_err().is_not_ready());
        assert!(s.unstage("a.txt").unwrap_err().is_not_ready());
        assert!(s.commit_and_push("msg").unwrap_err().is_not_ready());
        assert!(s.push().unwrap_err().is_not_ready());
        assert!(s.pull().unwrap_err().is_not_ready());
        assert!(s.close().unwrap_err().is_not_ready());
        assert!(s.head_commit().unwrap_err().is_not_ready());

        let b = s.backend();
        let touched = b.adds.get() + b.removes.get() + b.commits.get() + b.pushes.get() + b.pulls.get();
        assert_eq!(touched, 0);
        assert_eq!(b.closes.get(), 0);
        assert!(s.failure().is_some(), "close must not clear the failure");
    }

    #[test]
    fn clone_prepares_directory_then_binds_handle() {
        let td = tempdir().unwrap();
        let dir = td.path().join("repo");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("junk"), "x").unwrap();

        let s = SyncSession::clone_with(Counting::default(), "u", &dir, SessionConfig::default());

        assert!(s.is_ready());
        assert_eq!(s.backend().clones.get(), 1);
        assert!(!dir.join("junk").exists());
        assert!(s.initial_pull().is_none());
    }

    #[test]
    fn open_pulls_exactly_once() {
        let td = tempdir().unwrap();
        let s = SyncSession::open_with(Counting::default(), td.path(), SessionConfig::default());

        assert!(s.is_ready());
        assert_eq!(s.backend().pulls.get(), 1);
        assert!(matches!(s.initial_pull(), Some(Ok(PullOutcome::UpToDate))));
    }

    #[test]
    fn open_survives_failed_initial_pull() {
        let td = tempdir().unwrap();
        let backend = Counting {
            fail_pull: true,
            ..Default::default()
        };
        let s = SyncSession::open_with(backend, td.path(), SessionConfig::default());

        assert!(s.is_ready());
        assert_eq!(s.backend().pulls.get(), 1);
        assert!(matches!(
            s.initial_pull(),
            Some(Err(PullError::NetworkFailed { .. }))
        ));
    }

    #[test]
    fn failed_open_does_not_pull() {
        let td = tempdir().unwrap();
        let backend = Counting {
            fail_open: true,
            ..Default::default()
        };
        let s = SyncSession::open_with(backend, td.path(), SessionConfig::default());

        assert!(!s.is_ready());
        assert_eq!(s.backend().pulls.get(), 0);
        assert!(matches!(s.failure(), Some(SessionFailure::Open(_))));
    }

    #[test]
    fn failed_commit_skips_push() {
        let td = tempdir().unwrap();
        let backend = Counting {
            nothing_to_commit: true,
            ..Default::default()
        };
        let mut s = SyncSession::open_with(backend, td.path(), SessionConfig::default());

        let err = s.commit_and_push("empty").unwrap_err();

        assert!(matches!(err, SyncError::Commit(CommitError::NothingToCommit)));
        assert_eq!(s.backend().pushes.get(), 0);
        assert!(s.is_ready());
    }

    #[test]
    fn failed_push_keeps_local_commit() {
        let td = tempdir().unwrap();
        let backend = Counting {
            fail_push: true,
            ..Default::default()
        };
        let mut s = SyncSession::open_with(backend, td.path(), SessionConfig::default());
        s.stage("a.txt").unwrap();

        let err = s.commit_and_push("add a").unwrap_err();

        let SyncError::PushAfterCommit { commit, source } = err else {
            panic!("expected PushAfterCommit");
        };
        assert!(matches!(source, PushError::Rejected { .. }));
        assert_eq!(s.head_commit().unwrap(), Some(commit));
        assert!(s.is_ready());
    }

    #[test]
    fn push_retries_without_committing() {
        let td = tempdir().unwrap();
        let backend = Counting {
            fail_push: true,
            ..Default::default()
        };
        let mut s = SyncSession::open_with(backend, td.path(), SessionConfig::default());

        let err = s.push().unwrap_err();

        assert!(matches!(err, SyncError::Push(PushError::Rejected { .. })));
        assert_eq!(s.backend().pushes.get(), 1);
        assert_eq!(s.backend().commits.get(), 0);
    }

    #[test]
    fn operations_forward_to_backend() {
        let td = tempdir().unwrap();
        let mut s = SyncSession::open_with(Counting::default(), td.path(), SessionConfig::default());

        s.stage("a.txt").unwrap();
        s.unstage("b.txt").unwrap();
        let commit = s.commit_and_push("change").unwrap();
        s.pull().unwrap();

        assert_eq!(commit.as_str(), "c1");
        assert_eq!(
            s.handle().unwrap(),
            &vec!["add a.txt".to_string(), "rm b.txt".into(), "commit change".into()]
        );
        assert_eq!(s.backend().pushes.get(), 1);
        assert_eq!(s.backend().pulls.get(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let td = tempdir().unwrap();
        let mut s = SyncSession::open_with(Counting::default(), td.path(), SessionConfig::default());

        s.close().unwrap();
        s.close().unwrap();

        assert_eq!(s.backend().closes.get(), 1);
        assert!(s.stage("a.txt").unwrap_err().is_not_ready());
    }

    #[test]
    fn drop_releases_open_handle() {
        let td = tempdir().unwrap();
        let backend = Counting::default();
        let closes = Rc::clone(&backend.closes);

        let s = SyncSession::open_with(backend, td.path(), SessionConfig::default());
        assert_eq!(closes.get(), 0);
        drop(s);

        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn drop_after_close_does_not_release_twice() {
        let td = tempdir().unwrap();
        let backend = Counting::default();
        let closes = Rc::clone(&backend.closes);

        let mut s = SyncSession::open_with(backend, td.path(), SessionConfig::default());
        s.close().unwrap();
        drop(s);

        assert_eq!(closes.get(), 1);
    }
}
