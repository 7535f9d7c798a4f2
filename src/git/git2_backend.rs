use git2::{
    AnnotatedCommit, BranchType, Commit, Error, ErrorClass, ErrorCode, FetchOptions,
    IndexAddOption, IndexMatchedPath, PushOptions, Repository, RepositoryState, Signature,
    build::{CheckoutBuilder, RepoBuilder},
};
use std::cell::RefCell;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::transport::{Deadline, Failure, classify, remote_callbacks};
use super::{Backend, CommitId, PullOutcome};
use crate::config::SessionConfig;
use crate::error::{
    CloneError, CommitError, OpenError, PullError, PushError, StageError, UnstageError,
};
use crate::prepare::ReadyDirectory;

/// Used when neither the session nor the repository configures a committer.
const FALLBACK_NAME: &str = "websync";
const FALLBACK_EMAIL: &str = "websync@localhost";

/// [`Backend`] built on libgit2 through the `git2` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Backend;

impl Backend for Git2Backend {
    type Handle = Repository;

    fn clone_into(
        &self,
        url: &str,
        dir: &ReadyDirectory,
        config: &SessionConfig,
    ) -> Result<Repository, CloneError> {
        let deadline = Deadline::new(config.transport.timeout);
        let mut fo = FetchOptions::new();
        fo.remote_callbacks(remote_callbacks(&config.transport, &deadline));

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fo);

        let repo = builder
            .clone(url, dir.path())
            .map_err(|source| match classify(&source, &deadline) {
                Failure::Auth | Failure::Network => CloneError::TransportFailed {
                    url: url.to_string(),
                    source: if deadline.tripped() { deadline.error() } else { source },
                },
                Failure::Rejected | Failure::Other => CloneError::ProtocolFailed {
                    url: url.to_string(),
                    source,
                },
            })?;

        attach_branch(&repo, &config.remote_name, &config.default_branch).map_err(|source| {
            CloneError::ProtocolFailed {
                url: url.to_string(),
                source,
            }
        })?;
        Ok(repo)
    }

    fn open(&self, dir: &Path) -> Result<Repository, OpenError> {
        let git_dir = dir.join(".git");
        let corrupt = |source| OpenError::MetadataMissingOrCorrupt {
            path: dir.to_path_buf(),
            source,
        };
        if !git_dir.is_dir() {
            return Err(corrupt(Error::new(
                ErrorCode::NotFound,
                ErrorClass::Repository,
                format!("{} does not exist", git_dir.display()),
            )));
        }
        Repository::open(&git_dir).map_err(corrupt)
    }

    fn add(&self, repo: &mut Repository, pathspec: &str) -> Result<(), StageError> {
        let err = |source| StageError {
            pathspec: pathspec.to_string(),
            source,
        };
        let workdir = workdir(repo).map_err(err)?;
        inside_workdir(pathspec).map_err(err)?;
        let mut index = repo.index().map_err(err)?;

        let mut matched = 0usize;
        {
            let mut count = |_path: &Path, _spec: &[u8]| -> i32 {
                matched += 1;
                0
            };
            index
                .add_all(
                    [pathspec],
                    IndexAddOption::DEFAULT,
                    Some(&mut count as &mut IndexMatchedPath),
                )
                .map_err(err)?;
        }
        if matched == 0 && !workdir.join(pathspec).exists() {
            return Err(err(no_match(pathspec)));
        }
        index.write().map_err(err)?;
        debug!(pathspec, matched, "staged");
        Ok(())
    }

    fn remove(&self, repo: &mut Repository, pathspec: &str) -> Result<(), UnstageError> {
        let err = |source| UnstageError {
            pathspec: pathspec.to_string(),
            source,
        };
        let workdir = workdir(repo).map_err(err)?;
        inside_workdir(pathspec).map_err(err)?;
        let mut index = repo.index().map_err(err)?;

        let mut removed: Vec<PathBuf> = Vec::new();
        {
            let mut collect = |path: &Path, _spec: &[u8]| -> i32 {
                removed.push(path.to_path_buf());
                0
            };
            index
                .remove_all([pathspec], Some(&mut collect as &mut IndexMatchedPath))
                .map_err(err)?;
        }
        if removed.is_empty() {
            return Err(err(no_match(pathspec)));
        }
        index.write().map_err(err)?;

        // `git rm` also deletes the working-tree copy.
        for rel in &removed {
            match fs::remove_file(workdir.join(rel)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(err(Error::new(
                        ErrorCode::GenericError,
                        ErrorClass::Os,
                        format!("failed to delete {}: {}", rel.display(), e),
                    )));
                }
            }
        }
        debug!(pathspec, count = removed.len(), "removed");
        Ok(())
    }

    fn commit(
        &self,
        repo: &mut Repository,
        message: &str,
        config: &SessionConfig,
    ) -> Result<CommitId, CommitError> {
        let failed = |source| CommitError::Failed {
            message: message.to_string(),
            source,
        };

        let mut merge_heads = Vec::new();
        if repo.state() == RepositoryState::Merge {
            repo.mergehead_foreach(|oid| {
                merge_heads.push(*oid);
                true
            })
            .map_err(failed)?;
        }

        let mut index = repo.index().map_err(failed)?;
        let tree_id = index.write_tree().map_err(failed)?;
        let parent = head_commit(repo).map_err(failed)?;

        if merge_heads.is_empty() {
            let unchanged = match &parent {
                Some(p) => p.tree_id() == tree_id,
                None => index.is_empty(),
            };
            if unchanged {
                return Err(CommitError::NothingToCommit);
            }
        }

        let sig = signature(repo, config).map_err(failed)?;
        let tree = repo.find_tree(tree_id).map_err(failed)?;
        let mut parents: Vec<Commit<'_>> = parent.into_iter().collect();
        for oid in &merge_heads {
            parents.push(repo.find_commit(*oid).map_err(failed)?);
        }
        let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();

        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
            .map_err(failed)?;
        if !merge_heads.is_empty() {
            repo.cleanup_state().map_err(failed)?;
        }
        Ok(oid.into())
    }

    fn push(&self, repo: &mut Repository, config: &SessionConfig) -> Result<(), PushError> {
        let remote_name = config.remote_name.as_str();
        let deadline = Deadline::new(config.transport.timeout);
        let classify_err = |source: Error| match classify(&source, &deadline) {
            Failure::Auth => PushError::AuthFailed {
                remote: remote_name.to_string(),
                source,
            },
            Failure::Rejected => PushError::Rejected {
                remote: remote_name.to_string(),
                reason: source.message().to_string(),
            },
            Failure::Network => PushError::NetworkFailed {
                remote: remote_name.to_string(),
                source: if deadline.tripped() { deadline.error() } else { source },
            },
            Failure::Other => PushError::Failed {
                remote: remote_name.to_string(),
                source,
            },
        };

        let mut remote = repo.find_remote(remote_name).map_err(classify_err)?;
        let rejected: RefCell<Option<String>> = RefCell::new(None);

        let mut callbacks = remote_callbacks(&config.transport, &deadline);
        callbacks.push_update_reference(|refname, status| {
            if let Some(msg) = status {
                *rejected.borrow_mut() = Some(format!("{}: {}", refname, msg));
            }
            Ok(())
        });
        let mut opts = PushOptions::new();
        opts.remote_callbacks(callbacks);

        let refspec = format!(
            "refs/heads/{b}:refs/heads/{b}",
            b = config.default_branch
        );
        remote
            .push(&[refspec.as_str()], Some(&mut opts))
            .map_err(classify_err)?;

        if let Some(reason) = rejected.take() {
            return Err(PushError::Rejected {
                remote: remote_name.to_string(),
                reason,
            });
        }
        Ok(())
    }

    fn pull(&self, repo: &mut Repository, config: &SessionConfig) -> Result<PullOutcome, PullError> {
        let remote_name = config.remote_name.as_str();
        let branch = config.default_branch.as_str();
        let deadline = Deadline::new(config.transport.timeout);

        let fetch_err = |source: Error| match classify(&source, &deadline) {
            Failure::Auth => PullError::AuthFailed {
                remote: remote_name.to_string(),
                source,
            },
            Failure::Network => PullError::NetworkFailed {
                remote: remote_name.to_string(),
                source: if deadline.tripped() { deadline.error() } else { source },
            },
            Failure::Rejected | Failure::Other => PullError::Failed {
                remote: remote_name.to_string(),
                source,
            },
        };

        {
            let mut remote = repo.find_remote(remote_name).map_err(fetch_err)?;
            let mut fo = FetchOptions::new();
            fo.remote_callbacks(remote_callbacks(&config.transport, &deadline));
            let refspec = format!("+refs/heads/{b}:refs/remotes/{r}/{b}", b = branch, r = remote_name);
            remote
                .fetch(&[refspec.as_str()], Some(&mut fo), None)
                .map_err(fetch_err)?;
        }

        let failed = |source| PullError::Failed {
            remote: remote_name.to_string(),
            source,
        };
        let tracking = format!("refs/remotes/{}/{}", remote_name, branch);
        let fetched = match repo.find_reference(&tracking) {
            Ok(r) => repo.reference_to_annotated_commit(&r).map_err(failed)?,
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(%tracking, "remote branch does not exist yet");
                return Ok(PullOutcome::UpToDate);
            }
            Err(e) => return Err(failed(e)),
        };
        integrate(repo, &fetched, config).map_err(|e| match e {
            Integrate::Conflict(paths) => PullError::MergeConflict { paths },
            Integrate::Git(source) => failed(source),
        })
    }

    fn head(&self, repo: &Repository) -> Option<CommitId> {
        repo.head()
            .ok()
            .and_then(|h| h.target())
            .map(CommitId::from)
    }
}

enum Integrate {
    Conflict(Vec<String>),
    Git(Error),
}

impl From<Error> for Integrate {
    fn from(e: Error) -> Self {
        Integrate::Git(e)
    }
}

/// Bring the fetched commit into HEAD's branch.
///
/// Checkouts use the safe strategy, so local modifications that would be
/// overwritten abort the pull instead of being lost.
fn integrate(
    repo: &Repository,
    fetched: &AnnotatedCommit<'_>,
    config: &SessionConfig,
) -> Result<PullOutcome, Integrate> {
    let (analysis, _) = repo.merge_analysis(&[fetched])?;
    let target = fetched.id();

    if analysis.is_up_to_date() {
        return Ok(PullOutcome::UpToDate);
    }

    if analysis.is_unborn() {
        let head_ref = format!("refs/heads/{}", config.default_branch);
        let commit = repo.find_commit(target)?;
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
        repo.reference(&head_ref, target, true, "pull: initial")?;
        repo.set_head(&head_ref)?;
        info!(head = %target, "pulled into unborn branch");
        return Ok(PullOutcome::FastForwarded {
            head: target.into(),
        });
    }

    if analysis.is_fast_forward() {
        let commit = repo.find_commit(target)?;
        repo.checkout_tree(commit.as_object(), Some(CheckoutBuilder::new().safe()))?;
        repo.head()?.set_target(target, "pull: fast-forward")?;
        info!(head = %target, "fast-forwarded");
        return Ok(PullOutcome::FastForwarded {
            head: target.into(),
        });
    }

    repo.merge(&[fetched], None, Some(CheckoutBuilder::new().safe()))?;
    let mut index = repo.index()?;
    if index.has_conflicts() {
        let mut paths = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                paths.push(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
        warn!(?paths, "pull left merge conflicts");
        return Err(Integrate::Conflict(paths));
    }

    let tree = repo.find_tree(index.write_tree()?)?;
    let sig = signature(repo, config)?;
    let ours = repo.head()?.peel_to_commit()?;
    let theirs = repo.find_commit(target)?;
    let message = format!(
        "Merge branch '{}' of {}",
        config.default_branch, config.remote_name
    );
    let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&ours, &theirs])?;
    repo.cleanup_state()?;
    info!(head = %oid, "merged remote changes");
    Ok(PullOutcome::Merged { head: oid.into() })
}

/// Put HEAD on `branch`, creating a local branch for the remote one if needed.
///
/// Only an empty remote may lack `branch`; HEAD is then left on the unborn
/// `branch` so the first push creates it. A remote that has other branches
/// but not this one is an error.
fn attach_branch(repo: &Repository, remote: &str, branch: &str) -> Result<(), Error> {
    let head_ref = format!("refs/heads/{}", branch);
    let on_branch = repo
        .find_reference("HEAD")
        .ok()
        .and_then(|h| h.symbolic_target().map(|s| s == head_ref))
        .unwrap_or(false);

    let remote_ref = format!("refs/remotes/{}/{}", remote, branch);
    match repo.find_reference(&remote_ref) {
        Ok(_) if on_branch => {}
        Ok(r) => {
            let tip = r.peel_to_commit()?;
            if repo.find_branch(branch, BranchType::Local).is_err() {
                let mut b = repo.branch(branch, &tip, false)?;
                b.set_upstream(Some(format!("{}/{}", remote, branch).as_str()))?;
            }
            repo.set_head(&head_ref)?;
            repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
        }
        Err(e) if e.code() == ErrorCode::NotFound => {
            let has_branches = repo
                .references_glob(&format!("refs/remotes/{}/*", remote))?
                .next()
                .is_some();
            if has_branches {
                return Err(Error::new(
                    ErrorCode::NotFound,
                    ErrorClass::Reference,
                    format!("remote '{}' has no branch '{}'", remote, branch),
                ));
            }
            warn!(%remote_ref, "remote is empty; HEAD left unborn");
            if !on_branch {
                repo.set_head(&head_ref)?;
            }
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, Error> {
    match repo.head() {
        Ok(head) => head.peel_to_commit().map(Some),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn signature(repo: &Repository, config: &SessionConfig) -> Result<Signature<'static>, Error> {
    match &config.committer {
        Some(c) => Signature::now(&c.name, &c.email),
        None => repo
            .signature()
            .or_else(|_| Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)),
    }
}

fn workdir(repo: &Repository) -> Result<PathBuf, Error> {
    repo.workdir().map(Path::to_path_buf).ok_or_else(|| {
        Error::new(
            ErrorCode::BareRepo,
            ErrorClass::Repository,
            "repository has no working directory",
        )
    })
}

/// Reject pathspecs that name something outside the working tree.
fn inside_workdir(pathspec: &str) -> Result<(), Error> {
    let escapes = Path::new(pathspec).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(Error::new(
            ErrorCode::InvalidSpec,
            ErrorClass::Index,
            format!("pathspec '{}' is outside the working tree", pathspec),
        ));
    }
    Ok(())
}

fn no_match(pathspec: &str) -> Error {
    Error::new(
        ErrorCode::NotFound,
        ErrorClass::Index,
        format!("pathspec '{}' did not match any files", pathspec),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pathspecs_must_stay_inside_workdir() {
        assert!(inside_workdir("a.txt").is_ok());
        assert!(inside_workdir("docs/*.md").is_ok());
        assert!(inside_workdir("./docs/a.md").is_ok());

        let err = inside_workdir("../outside.txt").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSpec);
        assert!(inside_workdir("docs/../../x").is_err());
        assert!(inside_workdir("/etc/passwd").is_err());
    }
}
