//! Repository session
//!
//! One session owns a clone of the remote repository together with the
//! directory its working tree lives in. libgit2 offers no in-memory clone
//! target, so the session clones into a temp directory whose lifetime is
//! tied to the session value: replaced wholesale on re-initialize, removed
//! on drop. Nothing survives a process restart.

use std::fs;
use std::path::{Component, Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{BranchType, Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository, Signature};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::server::{Committer, Credentials, CsvEntry};

/// Errors that can occur during session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to clone repository: {0}")]
    Clone(String),

    #[error("Failed to fetch from origin: {0}")]
    Fetch(String),

    #[error("Failed to check out branch '{0}': {1}")]
    Checkout(String, String),

    #[error("Failed to commit: {0}")]
    Commit(String),

    #[error("Failed to push to origin: {0}")]
    Push(String),

    #[error("Not changed.")]
    NoChange,

    #[error("Repository not initialized. Send Initialize first.")]
    NotInitialized,

    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Failed to write file: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// A cloned repository and its working tree
pub struct RepoSession {
    repo: Repository,
    /// Owns the on-disk working tree; dropping the session removes it
    workdir: TempDir,
    credentials: Option<Credentials>,
}

impl RepoSession {
    /// Clone `url` into a fresh ephemeral working tree.
    pub fn clone(url: &str, credentials: Option<Credentials>) -> SessionResult<Self> {
        let workdir = TempDir::new()?;
        debug!(url, path = %workdir.path().display(), "Cloning repository");

        let repo = RepoBuilder::new()
            .fetch_options(fetch_options(credentials.as_ref()))
            .clone(url, workdir.path())
            .map_err(|e| SessionError::Clone(e.message().to_string()))?;

        Ok(Self {
            repo,
            workdir,
            credentials,
        })
    }

    /// Path of the session's working tree (for tests and logging)
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Write the CSV entries onto `target_branch`, commit, and push.
    ///
    /// The branch is rebuilt from the remote tip on every call so repeated
    /// applies never accumulate local drift. Returns the paths that were
    /// actually staged and committed.
    pub fn apply(
        &self,
        target_branch: &str,
        committer: &Committer,
        entries: &[CsvEntry],
    ) -> SessionResult<Vec<String>> {
        self.reset_local_branch(target_branch)?;
        self.fetch_origin()?;
        self.checkout_target(target_branch)?;

        let staged = self.stage_entries(entries)?;
        if staged.is_empty() {
            return Err(SessionError::NoChange);
        }

        let commit_id = self.commit_staged(committer, &staged)?;
        debug!(branch = target_branch, commit = %commit_id, "Created commit");

        self.push_branch(target_branch)?;
        Ok(staged)
    }

    /// Delete a leftover local branch of the target name, if any.
    ///
    /// libgit2 refuses to delete the checked-out branch, so HEAD is
    /// detached onto its current commit first when necessary.
    fn reset_local_branch(&self, target_branch: &str) -> SessionResult<()> {
        let Ok(mut existing) = self.repo.find_branch(target_branch, BranchType::Local) else {
            return Ok(());
        };
        if existing.is_head() {
            let head = self.repo.head()?.peel_to_commit()?;
            self.repo.set_head_detached(head.id())?;
        }
        debug!(branch = target_branch, "Deleting stale local branch");
        existing.delete()?;
        Ok(())
    }

    /// Refresh remote-tracking refs. A failure aborts the apply: committing
    /// on stale remote refs would push a branch built on an outdated base.
    fn fetch_origin(&self) -> SessionResult<()> {
        let mut remote = self.repo.find_remote("origin")?;
        remote
            .fetch(
                &[] as &[&str],
                Some(&mut fetch_options(self.credentials.as_ref())),
                None,
            )
            .map_err(|e| SessionError::Fetch(e.message().to_string()))
    }

    /// Check out `target_branch`, starting it from the remote tip when the
    /// branch exists upstream and from the current HEAD commit otherwise.
    fn checkout_target(&self, target_branch: &str) -> SessionResult<()> {
        let start = match self
            .repo
            .find_reference(&format!("refs/remotes/origin/{target_branch}"))
        {
            Ok(remote_ref) => remote_ref.peel_to_commit()?,
            Err(_) => self.repo.head()?.peel_to_commit()?,
        };
        self.repo.branch(target_branch, &start, true)?;

        self.repo
            .set_head(&format!("refs/heads/{target_branch}"))
            .and_then(|()| {
                self.repo
                    .checkout_head(Some(CheckoutBuilder::new().force()))
            })
            .map_err(|e| {
                SessionError::Checkout(target_branch.to_string(), e.message().to_string())
            })
    }

    /// Materialize each entry as `<path>.csv` in the working tree and stage
    /// it. A write failure aborts; a staging failure skips that entry and
    /// the rest continue (best-effort). Entries whose path would land
    /// outside the working tree are skipped before anything is written.
    fn stage_entries(&self, entries: &[CsvEntry]) -> SessionResult<Vec<String>> {
        let workdir = self.workdir.path();
        let mut index = self.repo.index()?;
        let mut staged = Vec::new();

        for entry in entries {
            let csv_path = format!("{}.csv", entry.path);
            let Some(rel_path) = worktree_relative(&csv_path) else {
                warn!(path = %csv_path, "Skipping entry whose path leaves the working tree");
                continue;
            };
            let abs_path = workdir.join(&rel_path);
            if let Some(parent) = abs_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&abs_path, entry.value.as_bytes())?;

            match index.add_path(&rel_path) {
                Ok(()) => staged.push(rel_path.to_string_lossy().into_owned()),
                Err(e) => {
                    warn!(path = %csv_path, error = %e, "Skipping entry that failed to stage");
                }
            }
        }

        index.write()?;
        Ok(staged)
    }

    /// Commit the staged paths on HEAD. The commit message lists them,
    /// matching what the extension expects to see in the branch history.
    fn commit_staged(
        &self,
        committer: &Committer,
        staged: &[String],
    ) -> SessionResult<git2::Oid> {
        let mut index = self.repo.index()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;
        let signature = Signature::now(&committer.name, &committer.email)
            .map_err(|e| SessionError::Commit(e.message().to_string()))?;
        let parent = self.repo.head()?.peel_to_commit()?;
        let message = format!("Update {}", staged.join(", "));

        self.repo
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                &message,
                &tree,
                &[&parent],
            )
            .map_err(|e| SessionError::Commit(e.message().to_string()))
    }

    /// Push the local branch to the same-named branch on origin.
    fn push_branch(&self, target_branch: &str) -> SessionResult<()> {
        let mut remote = self.repo.find_remote("origin")?;
        let refspec = format!("refs/heads/{target_branch}:refs/heads/{target_branch}");
        remote
            .push(
                &[refspec.as_str()],
                Some(&mut push_options(self.credentials.as_ref())),
            )
            .map_err(|e| SessionError::Push(e.message().to_string()))
    }
}

/// Validate that `path` stays inside the working tree when joined onto it.
///
/// The browser side controls these paths, so absolute paths, `..`
/// components, and drive prefixes are all refused rather than resolved.
/// Returns the cleaned relative path suitable for both the filesystem
/// and the index.
fn worktree_relative(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        return None;
    }
    Some(clean)
}

fn remote_callbacks(credentials: Option<&Credentials>) -> RemoteCallbacks<'static> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(creds) = credentials {
        let creds = creds.clone();
        callbacks.credentials(move |_url, username_from_url, _allowed| {
            let username = if creds.username.is_empty() {
                username_from_url.unwrap_or("git")
            } else {
                creds.username.as_str()
            };
            Cred::userpass_plaintext(username, &creds.token)
        });
    }
    callbacks
}

fn fetch_options(credentials: Option<&Credentials>) -> FetchOptions<'static> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks(credentials));
    options
}

fn push_options(credentials: Option<&Credentials>) -> PushOptions<'static> {
    let mut options = PushOptions::new();
    options.remote_callbacks(remote_callbacks(credentials));
    options
}
