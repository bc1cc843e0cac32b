//! Git repository synchronization.
//!
//! Clones repositories into deterministic temp directories, reuses existing
//! clones and switches branches. Blocking libgit2 calls run on the blocking
//! pool; the `repositories` and `branches` steps build on top.

mod steps;

use std::path::{Path, PathBuf};

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{BranchType, Direction, ErrorCode, FetchOptions, Remote, Repository, ResetType, StatusOptions};

pub use steps::{branches, branches_with, repositories, repositories_with, BranchesHelpers, RepositoriesHelpers};

use crate::core::{Result, WorkflowError};

/// Git repository wrapper with the operations pipelines need.
pub struct GitRepository {
    repo: Repository,
}

impl GitRepository {
    /// Open the repository at exactly `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self { repo: Repository::open(path.as_ref())? })
    }

    /// Get the repository root path.
    #[must_use]
    pub fn root(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_path_buf)
    }

    /// Get the current branch name (None if HEAD is detached or unborn).
    #[must_use]
    pub fn current_branch(&self) -> Option<String> {
        let head = self.repo.head().ok()?;

        if head.is_branch() {
            head.shorthand().map(String::from)
        } else {
            None
        }
    }

    /// Get all local branch names.
    #[must_use]
    pub fn branches(&self) -> Vec<String> {
        self.repo
            .branches(Some(BranchType::Local))
            .ok()
            .map(|branches| {
                branches
                    .filter_map(std::result::Result::ok)
                    .filter_map(|(branch, _)| branch.name().ok().flatten().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check out `name`, creating it when it does not exist locally.
    ///
    /// A missing branch is created from `origin/<name>` when the remote has it,
    /// otherwise from HEAD. Returns the branch checked out afterwards.
    pub fn switch_branch(&self, name: &str) -> Result<String> {
        let branch = match self.repo.find_branch(name, BranchType::Local) {
            Ok(branch) => branch,
            Err(err) if err.code() == ErrorCode::NotFound => {
                let tracking = format!("origin/{}", name);
                match self.repo.find_branch(&tracking, BranchType::Remote) {
                    Ok(remote) => {
                        let commit = remote.get().peel_to_commit()?;
                        let mut branch = self.repo.branch(name, &commit, false)?;
                        branch.set_upstream(Some(&tracking))?;
                        branch
                    }
                    Err(_) => {
                        tracing::info!(branch = name, "Creating branch from HEAD");
                        let head = self.repo.head()?.peel_to_commit()?;
                        self.repo.branch(name, &head, false)?
                    }
                }
            }
            Err(err) => return Err(err.into()),
        };

        let reference = branch.into_reference();
        let refname = reference
            .name()
            .ok_or_else(|| WorkflowError::Git(format!("Branch `{}` has a non UTF-8 name", name)))?
            .to_string();
        let tree = reference.peel_to_tree()?;
        self.repo.checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().safe()))?;
        self.repo.set_head(&refname)?;

        self.current_branch()
            .ok_or_else(|| WorkflowError::Git(format!("HEAD is not on a branch after switching to `{}`", name)))
    }

    /// Throw away local state and put `branch` at `origin/<branch>`.
    ///
    /// Untracked files and local changes are removed, `branch` is fetched
    /// and checked out at the remote commit, and every other local branch is
    /// deleted.
    pub fn reset_to_remote(&self, branch: &str) -> Result<()> {
        self.clean_untracked()?;

        let refspec = format!("refs/heads/{0}:refs/remotes/origin/{0}", branch);
        self.repo.find_remote("origin")?.fetch(&[refspec.as_str()], Some(&mut FetchOptions::new()), None)?;
        let commit = self
            .repo
            .find_reference(&format!("refs/remotes/origin/{}", branch))?
            .peel_to_commit()?;

        self.repo.set_head_detached(commit.id())?;
        self.repo.reset(commit.as_object(), ResetType::Hard, Some(CheckoutBuilder::new().force()))?;
        self.repo.branch(branch, &commit, true)?;
        self.repo.set_head(&format!("refs/heads/{}", branch))?;

        for name in self.branches().into_iter().filter(|name| name != branch) {
            tracing::debug!(branch = %name, "Deleting local branch");
            self.repo.find_branch(&name, BranchType::Local)?.delete()?;
        }
        Ok(())
    }

    fn clean_untracked(&self) -> Result<()> {
        let root = self
            .root()
            .ok_or_else(|| WorkflowError::Git("Cannot clean a bare repository".to_string()))?;
        let mut options = StatusOptions::new();
        options.include_untracked(true).include_ignored(false);

        let untracked: Vec<PathBuf> = self
            .repo
            .statuses(Some(&mut options))?
            .iter()
            .filter(|entry| entry.status().is_wt_new())
            .filter_map(|entry| entry.path().map(|path| root.join(path)))
            .collect();
        for path in untracked {
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            removed.map_err(|err| WorkflowError::io(&path, err))?;
        }
        Ok(())
    }
}

/// Default branch of a remote, confirmed to resolve to a commit.
pub fn default_branch_from_remote(url: &str) -> Result<String> {
    let mut remote = Remote::create_detached(url)?;
    remote.connect(Direction::Fetch)?;

    let full = remote
        .default_branch()?
        .as_str()
        .map(String::from)
        .ok_or_else(|| WorkflowError::Git(format!("No remote default branch found in {}", url)))?;
    let resolves = remote.list()?.iter().any(|head| head.name() == full && !head.oid().is_zero());
    remote.disconnect()?;

    if !resolves {
        return Err(WorkflowError::Git(format!("Default branch {} of {} has no commit", full, url)));
    }
    Ok(full.trim_start_matches("refs/heads/").to_string())
}

/// Clone `url` into `dest` unless a clone is already there.
///
/// An existing clone is reset to the remote's default branch, dropping local
/// changes, untracked files and other local branches. Returns the branch
/// checked out in `dest`.
pub fn clone_if_absent(url: &str, dest: &Path, shallow: bool) -> Result<String> {
    if dest.is_dir() {
        tracing::info!(url, path = %dest.display(), "Directory already exists, skipping clone");
        let repo = GitRepository::open(dest)?;
        let default = default_branch_from_remote(url)?;
        repo.reset_to_remote(&default)?;
        return Ok(default);
    }

    tracing::info!(url, path = %dest.display(), shallow, "Cloning repository");
    let mut fetch = FetchOptions::new();
    if shallow {
        fetch.depth(1);
    }
    let repo = RepoBuilder::new().fetch_options(fetch).clone(url, dest)?;

    GitRepository { repo }
        .current_branch()
        .ok_or_else(|| WorkflowError::Git(format!("Clone of {} has no branch checked out", url)))
}

/// [`clone_if_absent`] on the blocking pool.
pub async fn sync_repository(url: String, dest: PathBuf, shallow: bool) -> Result<String> {
    tokio::task::spawn_blocking(move || clone_if_absent(&url, &dest, shallow)).await?
}

/// [`GitRepository::switch_branch`] on the blocking pool.
pub async fn switch_branch(dir: PathBuf, branch: String) -> Result<String> {
    tokio::task::spawn_blocking(move || GitRepository::open(&dir)?.switch_branch(&branch)).await?
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use git2::{Repository, RepositoryInitOptions, Signature};

    /// Repository with one commit on `main`.
    pub fn origin(path: &Path) -> Repository {
        let mut options = RepositoryInitOptions::new();
        options.initial_head("main");
        let repo = Repository::init_opts(path, &options).unwrap();
        std::fs::write(path.join("README.md"), "hello\n").unwrap();
        {
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::now("Test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
        }
        repo
    }
}
