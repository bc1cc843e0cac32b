//! The `repositories` and `branches` steps.

use std::future::Future;

use sha2::{Digest, Sha256};

use super::{switch_branch, sync_repository};
use crate::core::context::{self, Ambient};
use crate::core::{
    helper_callback, instrument, Chain, HelperCallback, NodeBuilder, RepositoryContext, Result,
    Runtime, SpawnOutput, StepScope,
};
use crate::exec::{exec, ExecHelpers};
use crate::files::{files, js_files, js_files_with, FilesHelpers, JsFamHelpers};
use crate::fs::{dirs, dirs_with, tmp_dir, DirsHelpers, Patterns};

macro_rules! workspace_helpers {
    ($name:ident) => {
        impl $name {
            pub fn dirs(&self, globs: impl Into<Patterns>) -> Chain<DirsHelpers, ()> {
                let globs = globs.into();
                self.scope.nest(|| dirs(globs))
            }

            pub fn dirs_with<F, Fut>(&self, globs: impl Into<Patterns>, callback: F) -> Chain<DirsHelpers, ()>
            where
                F: Fn(DirsHelpers) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<()>> + Send + 'static,
            {
                let globs = globs.into();
                self.scope.nest(|| dirs_with(globs, callback))
            }

            pub fn files(&self, globs: impl Into<Patterns>) -> Chain<FilesHelpers, ()> {
                let globs = globs.into();
                self.scope.nest(|| files(globs))
            }

            pub fn js_files(&self, globs: impl Into<Patterns>) -> Chain<JsFamHelpers, ()> {
                let globs = globs.into();
                self.scope.nest(|| js_files(globs))
            }

            pub fn js_files_with<F, Fut>(
                &self,
                globs: impl Into<Patterns>,
                callback: F,
            ) -> Chain<JsFamHelpers, ()>
            where
                F: Fn(JsFamHelpers) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<()>> + Send + 'static,
            {
                let globs = globs.into();
                self.scope.nest(|| js_files_with(globs, callback))
            }

            pub fn exec<I, S>(&self, command: &str, args: I) -> Chain<ExecHelpers, Vec<SpawnOutput>>
            where
                I: IntoIterator<Item = S>,
                S: Into<String>,
            {
                self.scope.nest(|| exec(command, args))
            }
        }
    };
}

/// Helpers available inside a `repositories` step.
#[derive(Debug, Clone)]
pub struct RepositoriesHelpers {
    scope: StepScope,
}

impl RepositoriesHelpers {
    fn new(scope: StepScope) -> Self {
        Self { scope }
    }

    pub fn branches(&self, names: impl Into<Patterns>) -> Chain<BranchesHelpers, ()> {
        let names = names.into();
        self.scope.nest(|| branches(names))
    }

    pub fn branches_with<F, Fut>(&self, names: impl Into<Patterns>, callback: F) -> Chain<BranchesHelpers, ()>
    where
        F: Fn(BranchesHelpers) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let names = names.into();
        self.scope.nest(|| branches_with(names, callback))
    }
}

workspace_helpers!(RepositoriesHelpers);

/// Helpers available inside a `branches` step.
#[derive(Debug, Clone)]
pub struct BranchesHelpers {
    scope: StepScope,
}

impl BranchesHelpers {
    fn new(scope: StepScope) -> Self {
        Self { scope }
    }
}

workspace_helpers!(BranchesHelpers);

/// Clone (or reuse) each repository in turn and run nested steps inside it.
///
/// Each clone lives in a deterministic temp directory derived from the URL
/// and its position. A repository that fails is logged and skipped so the
/// remaining ones still run.
pub fn repositories(urls: impl Into<Patterns>) -> Chain<RepositoriesHelpers, ()> {
    build_repositories(urls.into(), None)
}

/// Run `callback` inside each repository.
pub fn repositories_with<F, Fut>(urls: impl Into<Patterns>, callback: F) -> Chain<RepositoriesHelpers, ()>
where
    F: Fn(RepositoriesHelpers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    build_repositories(urls.into(), Some(helper_callback(callback)))
}

fn clone_key(url: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(index.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn build_repositories(
    urls: Patterns,
    callback: Option<HelperCallback<RepositoriesHelpers>>,
) -> Chain<RepositoriesHelpers, ()> {
    let recorded = urls.clone();
    instrument("repositories", &recorded, || {
        NodeBuilder::new("repositories")
            .arguments(move || Ok(urls.as_slice().to_vec()))
            .helpers(RepositoriesHelpers::new)
            .callback_with_helpers(callback)
            .executor(|next, node| async move {
                let urls = node.arguments()?;
                let shallow = Runtime::current().config().git.shallow;

                context::with_repositories(urls.clone(), async {
                    for (index, url) in urls.iter().enumerate() {
                        let dest = tmp_dir([url.as_str(), clone_key(url, index).as_str()]);
                        let visit = async {
                            let branch = sync_repository(url.clone(), dest.clone(), shallow).await?;
                            Ambient::current()
                                .with_cwd(dest.clone())
                                .with_repository(RepositoryContext::new(url.as_str(), branch))
                                .scope(next())
                                .await
                        };
                        if let Err(err) = visit.await {
                            tracing::error!(step = node.name(), url = %url, error = %err, "Repository failed");
                        }
                    }
                })
                .await;
                Ok(())
            })
            .run()
    })
}

/// Check out each branch in turn inside the current repository.
///
/// Missing branches are created. The current-repository context follows
/// the branch actually checked out.
pub fn branches(names: impl Into<Patterns>) -> Chain<BranchesHelpers, ()> {
    build_branches(names.into(), None)
}

/// Run `callback` on each branch.
pub fn branches_with<F, Fut>(names: impl Into<Patterns>, callback: F) -> Chain<BranchesHelpers, ()>
where
    F: Fn(BranchesHelpers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    build_branches(names.into(), Some(helper_callback(callback)))
}

fn build_branches(
    names: Patterns,
    callback: Option<HelperCallback<BranchesHelpers>>,
) -> Chain<BranchesHelpers, ()> {
    let recorded = names.clone();
    instrument("branches", &recorded, || {
        NodeBuilder::new("branches")
            .arguments(move || Ok(names.as_slice().to_vec()))
            .helpers(BranchesHelpers::new)
            .callback_with_helpers(callback)
            .executor(|next, node| async move {
                let repository = context::repository()?;
                let dir = context::cwd();
                for name in node.arguments()? {
                    let actual = switch_branch(dir.clone(), name).await?;
                    tracing::debug!(step = node.name(), url = %repository.url, branch = %actual, "Switched branch");
                    context::with_repository(repository.with_branch(actual), next()).await?;
                }
                Ok(())
            })
            .run()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::core::{Config, WorkflowError};
    use crate::git::fixtures;

    fn isolated_runtime() -> (tempfile::TempDir, Runtime) {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.tmp_dir_name = scratch
            .path()
            .strip_prefix(std::env::temp_dir())
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| format!("modflow-test-{}", uuid::Uuid::new_v4()));
        (scratch, Runtime::builder().config(config).build())
    }

    #[tokio::test]
    async fn test_repositories_and_branches() {
        let origin = tempfile::tempdir().unwrap();
        fixtures::origin(origin.path());
        let url = origin.path().display().to_string();
        let (_scratch, runtime) = isolated_runtime();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        runtime
            .clone()
            .enter(async move {
                repositories_with(url.as_str(), move |repo| {
                    let sink = Arc::clone(&sink);
                    async move {
                        repo.branches_with("main feature", move |_| {
                            let sink = Arc::clone(&sink);
                            async move {
                                let current = context::repository()?;
                                assert!(context::cwd().join("README.md").exists());
                                assert_eq!(context::repositories()?.len(), 1);
                                sink.lock().push(current.branch);
                                Ok(())
                            }
                        })
                        .await
                    }
                })
                .await
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock(), ["main", "feature"]);

        let tree = runtime.registry().snapshot();
        assert_eq!(tree[0].name, "repositories");
        assert_eq!(tree[0].children[0].name, "branches");
    }

    #[tokio::test]
    async fn test_failing_repository_is_skipped() {
        let (_scratch, runtime) = isolated_runtime();
        let reached = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&reached);

        runtime
            .enter(async move {
                repositories_with("/definitely/not/a/repo", move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        *counter.lock() += 1;
                        Ok(())
                    }
                })
                .await
            })
            .await
            .unwrap();

        assert_eq!(*reached.lock(), 0);
    }

    #[tokio::test]
    async fn test_branches_require_repository() {
        let err = branches("main").await.unwrap_err();
        assert!(matches!(err, WorkflowError::MissingContext(_)));
    }

    #[test]
    fn test_clone_key_depends_on_index() {
        assert_eq!(clone_key("a", 0), clone_key("a", 0));
        assert_ne!(clone_key("a", 0), clone_key("a", 1));
    }
}
