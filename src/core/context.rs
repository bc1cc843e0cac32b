//! Ambient context store.
//!
//! "Where am I" state (working directory, current file, repository, structural
//! match, active step) is carried implicitly through nested async work.
//! Every scope clones the innermost [`Ambient`] frame, overrides one slot and
//! installs the result as a tokio task-local for the duration of a future or
//! closure. Leaving the scope, normally or through an error, restores the
//! enclosing frame.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use super::builder::Wrapper;
use super::error::{ContextKind, Result, WorkflowError};
use super::runtime::Runtime;
use super::tree::ExecutionNode;
use crate::files::FileContext;
use crate::structural::MatchContext;

tokio::task_local! {
    static AMBIENT: Ambient;
}

/// Repository a step is operating on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryContext {
    /// Remote URL the repository was cloned from
    pub url: String,

    /// Branch currently checked out
    pub branch: String,
}

impl RepositoryContext {
    /// Create a repository context.
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self { url: url.into(), branch: branch.into() }
    }

    /// Same repository on another branch.
    #[must_use]
    pub fn with_branch(&self, branch: impl Into<String>) -> Self {
        Self { url: self.url.clone(), branch: branch.into() }
    }
}

/// One frame of ambient state.
///
/// Unset slots fall back to the enclosing frame's value because every new
/// frame starts as a clone of the current one.
#[derive(Clone, Default)]
pub struct Ambient {
    pub(crate) cwd: Option<PathBuf>,
    pub(crate) previous_cwd: Option<PathBuf>,
    pub(crate) file: Option<FileContext>,
    pub(crate) repository: Option<RepositoryContext>,
    pub(crate) repositories: Option<Arc<Vec<String>>>,
    pub(crate) structural_match: Option<MatchContext>,
    pub(crate) step: Option<Arc<ExecutionNode>>,
    pub(crate) parent: Option<Arc<ExecutionNode>>,
    pub(crate) wrapper: Option<Wrapper>,
    pub(crate) runtime: Option<Runtime>,
}

impl fmt::Debug for Ambient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ambient")
            .field("cwd", &self.cwd)
            .field("file", &self.file.as_ref().map(|file| file.path().to_path_buf()))
            .field("repository", &self.repository)
            .field("repositories", &self.repositories)
            .field("step", &self.step.as_ref().map(|node| node.name().to_string()))
            .field("parent", &self.parent.as_ref().map(|node| node.name().to_string()))
            .field("wrapped", &self.wrapper.is_some())
            .finish()
    }
}

impl Ambient {
    /// Snapshot of the innermost active frame, or an empty frame outside any scope.
    pub fn current() -> Self {
        AMBIENT.try_with(Clone::clone).unwrap_or_default()
    }

    /// Switch the working directory, remembering the one it replaces.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.previous_cwd = self.cwd.replace(cwd.into());
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: FileContext) -> Self {
        self.file = Some(file);
        self
    }

    #[must_use]
    pub fn with_repository(mut self, repository: RepositoryContext) -> Self {
        self.repository = Some(repository);
        self
    }

    #[must_use]
    pub fn with_repositories(mut self, repositories: Vec<String>) -> Self {
        self.repositories = Some(Arc::new(repositories));
        self
    }

    #[must_use]
    pub fn with_match(mut self, structural_match: MatchContext) -> Self {
        self.structural_match = Some(structural_match);
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: Option<Arc<ExecutionNode>>) -> Self {
        self.step = step;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Option<Arc<ExecutionNode>>) -> Self {
        self.parent = parent;
        self
    }

    #[must_use]
    pub fn with_wrapper(mut self, wrapper: Option<Wrapper>) -> Self {
        self.wrapper = wrapper;
        self
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Runtime installed in this frame, if any.
    pub fn runtime(&self) -> Option<&Runtime> {
        self.runtime.as_ref()
    }

    /// Run a future with this frame installed.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        AMBIENT.scope(self, fut).await
    }

    /// Run a closure with this frame installed.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        AMBIENT.sync_scope(self, f)
    }
}

/// Current working directory, defaulting to the process directory.
pub fn cwd() -> PathBuf {
    Ambient::current()
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Working directory before the innermost change, defaulting to the process directory.
pub fn enclosing_cwd() -> PathBuf {
    Ambient::current()
        .previous_cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Current file, or a missing-context error.
pub fn file() -> Result<FileContext> {
    Ambient::current().file.ok_or(WorkflowError::MissingContext(ContextKind::File))
}

/// Current file if one is active.
pub fn try_file() -> Option<FileContext> {
    Ambient::current().file
}

/// Current repository, or a missing-context error.
pub fn repository() -> Result<RepositoryContext> {
    Ambient::current().repository.ok_or(WorkflowError::MissingContext(ContextKind::Repository))
}

/// Current repository set, or a missing-context error.
pub fn repositories() -> Result<Arc<Vec<String>>> {
    Ambient::current()
        .repositories
        .ok_or(WorkflowError::MissingContext(ContextKind::Repositories))
}

/// Current structural match, or a missing-context error.
pub fn structural_match() -> Result<MatchContext> {
    Ambient::current()
        .structural_match
        .ok_or(WorkflowError::MissingContext(ContextKind::StructuralMatch))
}

/// Node of the step currently being built or executed.
pub fn current_step() -> Option<Arc<ExecutionNode>> {
    Ambient::current().step
}

/// Node new steps attach to.
pub fn parent_step() -> Option<Arc<ExecutionNode>> {
    Ambient::current().parent
}

/// Name of the active step, for logging.
pub fn step_name() -> Option<String> {
    current_step().map(|node| node.name().to_string())
}

/// Name of the active parent step, for logging.
pub fn parent_step_name() -> Option<String> {
    parent_step().map(|node| node.name().to_string())
}

/// Run a future with `cwd` as the working directory.
pub async fn with_cwd<F: Future>(cwd: impl Into<PathBuf>, fut: F) -> F::Output {
    Ambient::current().with_cwd(cwd).scope(fut).await
}

/// Run a future with `file` as the current file.
pub async fn with_file<F: Future>(file: FileContext, fut: F) -> F::Output {
    Ambient::current().with_file(file).scope(fut).await
}

/// Run a future inside a repository.
pub async fn with_repository<F: Future>(repository: RepositoryContext, fut: F) -> F::Output {
    Ambient::current().with_repository(repository).scope(fut).await
}

/// Run a future with a repository set.
pub async fn with_repositories<F: Future>(repositories: Vec<String>, fut: F) -> F::Output {
    Ambient::current().with_repositories(repositories).scope(fut).await
}

/// Run a future with a structural match active.
pub async fn with_match<F: Future>(structural_match: MatchContext, fut: F) -> F::Output {
    Ambient::current().with_match(structural_match).scope(fut).await
}

/// Run a future with `parent` as the node new steps attach to.
pub async fn with_parent<F: Future>(parent: Option<Arc<ExecutionNode>>, fut: F) -> F::Output {
    Ambient::current().with_parent(parent).scope(fut).await
}
