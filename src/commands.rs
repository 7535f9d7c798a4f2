//! CLI commands. Each one builds a session, runs one operation, and closes it.

use anyhow::{Result, bail};
use std::path::Path;

use crate::config::SessionConfig;
use crate::error::SyncError;
use crate::git::PullOutcome;
use crate::progress::{finish_err, finish_ok, spinner};
use crate::session::SyncSession;

fn describe(outcome: &PullOutcome) -> String {
    match outcome {
        PullOutcome::UpToDate => "already up to date".to_string(),
        PullOutcome::FastForwarded { head } => format!("fast-forwarded to {}", head),
        PullOutcome::Merged { head } => format!("merged remote changes ({})", head),
    }
}

/// Open `path` and report the implicit pull on a spinner line.
fn open_session(path: &Path, config: SessionConfig) -> Result<SyncSession> {
    let pb = spinner(format!("syncing {}", path.display()));
    let session = SyncSession::open(path, config);
    if let Some(f) = session.failure() {
        finish_err(&pb, format!("open {} (error: {})", path.display(), f));
        bail!("cannot open {}: {}", path.display(), f);
    }
    match session.initial_pull() {
        Some(Ok(outcome)) => finish_ok(&pb, format!("{}: {}", path.display(), describe(outcome))),
        Some(Err(e)) => finish_err(&pb, format!("pull {} (error: {})", path.display(), e)),
        None => finish_ok(&pb, format!("opened {}", path.display())),
    }
    Ok(session)
}

/// Reset `path` and clone `url` into it.
pub fn cmd_clone(url: &str, path: &Path, config: SessionConfig) -> Result<()> {
    let pb = spinner(format!("cloning {}", url));
    let mut session = SyncSession::clone_into(url, path, config);
    if let Some(f) = session.failure() {
        finish_err(&pb, format!("clone {} (error: {})", url, f));
        bail!("clone failed: {}", f);
    }
    finish_ok(&pb, format!("cloned {} into {}", url, path.display()));
    session.close()?;
    Ok(())
}

/// Open `path`, which pulls, and fail if that pull failed.
pub fn cmd_pull(path: &Path, config: SessionConfig) -> Result<()> {
    let mut session = open_session(path, config)?;
    if let Some(Err(e)) = session.initial_pull() {
        bail!("pull failed: {}", e);
    }
    session.close()?;
    Ok(())
}

pub fn cmd_add(path: &Path, files: &[String], config: SessionConfig) -> Result<()> {
    let mut session = open_session(path, config)?;
    for f in files {
        session.stage(f)?;
        println!("add '{}'", f);
    }
    session.close()?;
    Ok(())
}

pub fn cmd_rm(path: &Path, files: &[String], config: SessionConfig) -> Result<()> {
    let mut session = open_session(path, config)?;
    for f in files {
        session.unstage(f)?;
        println!("rm '{}'", f);
    }
    session.close()?;
    Ok(())
}

/// Commit everything staged and push it.
///
/// When only the push fails the commit id is printed, so it can be pushed
/// again after a pull.
pub fn cmd_push(path: &Path, message: &str, config: SessionConfig) -> Result<()> {
    let mut session = open_session(path, config)?;
    let pb = spinner(format!("pushing '{}'", message));
    match session.commit_and_push(message) {
        Ok(commit) => finish_ok(&pb, format!("pushed {}", commit)),
        Err(SyncError::PushAfterCommit { commit, source }) => {
            finish_err(&pb, format!("committed {} locally (error: {})", commit, source));
            bail!("push failed; {} is only committed locally", commit);
        }
        Err(e) => {
            finish_err(&pb, format!("commit (error: {})", e));
            return Err(e.into());
        }
    }
    session.close()?;
    Ok(())
}

/// Print the commit HEAD points to.
pub fn cmd_status(path: &Path, config: SessionConfig) -> Result<()> {
    let mut session = open_session(path, config)?;
    match session.head_commit()? {
        Some(id) => println!("HEAD {}", id),
        None => println!("HEAD (no commits)"),
    }
    session.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Committer;
    use git2::{Repository, Signature};
    use std::fs;
    use tempfile::tempdir;

    fn config() -> SessionConfig {
        SessionConfig {
            committer: Some(Committer {
                name: "cli".into(),
                email: "cli@example.com".into(),
            }),
            ..SessionConfig::default()
        }
    }

    fn bare_remote(root: &Path) -> std::path::PathBuf {
        let path = root.join("remote.git");
        let repo = Repository::init_bare(&path).unwrap();
        {
            let mut tb = repo.treebuilder(None).unwrap();
            tb.insert("README.md", repo.blob(b"hi\n").unwrap(), 0o100644)
                .unwrap();
            let tree = repo.find_tree(tb.write().unwrap()).unwrap();
            let sig = Signature::now("seed", "seed@example.com").unwrap();
            repo.commit(Some("refs/heads/master"), &sig, &sig, "seed", &tree, &[])
                .unwrap();
        }
        repo.set_head("refs/heads/master").unwrap();
        path
    }

    #[test]
    fn describe_pull_outcomes() {
        let head = crate::git::CommitId::from("abc".to_string());
        assert_eq!(describe(&PullOutcome::UpToDate), "already up to date");
        assert_eq!(
            describe(&PullOutcome::FastForwarded { head: head.clone() }),
            "fast-forwarded to abc"
        );
        assert_eq!(
            describe(&PullOutcome::Merged { head }),
            "merged remote changes (abc)"
        );
    }

    #[test]
    fn commands_on_plain_directory_fail() {
        let td = tempdir().unwrap();

        let err = cmd_status(td.path(), config()).unwrap_err();
        assert!(err.to_string().contains("cannot open"), "{err}");
        assert!(cmd_pull(td.path(), config()).is_err());
        assert!(cmd_add(td.path(), &["a.txt".into()], config()).is_err());
    }

    #[test]
    fn clone_add_push_round() {
        let td = tempdir().unwrap();
        let remote = bare_remote(td.path());
        let local = td.path().join("work");

        cmd_clone(remote.to_str().unwrap(), &local, config()).unwrap();
        fs::write(local.join("note.txt"), "n\n").unwrap();
        cmd_add(&local, &["note.txt".into()], config()).unwrap();
        cmd_push(&local, "add note", config()).unwrap();
        cmd_status(&local, config()).unwrap();

        let repo = Repository::open_bare(&remote).unwrap();
        let tip = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(tip.message(), Some("add note"));
        assert!(tip.tree().unwrap().get_name("note.txt").is_some());
    }

    #[test]
    fn push_with_nothing_staged_fails() {
        let td = tempdir().unwrap();
        let remote = bare_remote(td.path());
        let local = td.path().join("work");
        cmd_clone(remote.to_str().unwrap(), &local, config()).unwrap();

        let err = cmd_push(&local, "empty", config()).unwrap_err();

        assert!(err.to_string().contains("nothing to commit"), "{err}");
    }
}
