//! The `dirs` step.

use std::future::Future;
use std::path::PathBuf;

use super::{glob, move_to, EntryKind, Patterns};
use crate::core::context::{self, Ambient};
use crate::core::{
    helper_callback, record, Chain, HelperCallback, NodeBuilder, Result, Runtime, SpawnOutput,
    StepScope, WorkflowError,
};
use crate::exec::{exec, ExecHelpers};
use crate::files::{files, files_with, js_files, js_files_with, FilesHelpers, JsFamHelpers};

/// Helpers available inside a `dirs` step.
#[derive(Debug, Clone)]
pub struct DirsHelpers {
    scope: StepScope,
}

impl DirsHelpers {
    pub(crate) fn new(scope: StepScope) -> Self {
        Self { scope }
    }

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

    pub fn files_with<F, Fut>(&self, globs: impl Into<Patterns>, callback: F) -> Chain<FilesHelpers, ()>
    where
        F: Fn(FilesHelpers) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let globs = globs.into();
        self.scope.nest(|| files_with(globs, callback))
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

    /// Move the current directory into `target`, see [`move_to`].
    pub fn move_to(&self, target: impl Into<PathBuf>) -> Chain<(), ()> {
        let target = target.into();
        self.scope.nest(|| move_to(target))
    }
}

/// Run nested steps once per directory matching `globs`.
///
/// Directories are visited one at a time in path order, each becoming the
/// working directory. Every visit records its own `dirs` node so steps built
/// inside attach beneath the directory they ran in.
///
/// ```no_run
/// # async fn run() -> modflow::core::Result<()> {
/// use modflow::fs::dirs_with;
///
/// dirs_with("apps/*", |dir| async move {
///     dir.exec("npm", ["install"]).await?;
///     Ok(())
/// })
/// .await
/// # }
/// ```
pub fn dirs(globs: impl Into<Patterns>) -> Chain<DirsHelpers, ()> {
    build(globs.into(), None)
}

/// Run `callback` once per directory matching `globs`.
pub fn dirs_with<F, Fut>(globs: impl Into<Patterns>, callback: F) -> Chain<DirsHelpers, ()>
where
    F: Fn(DirsHelpers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    build(globs.into(), Some(helper_callback(callback)))
}

fn build(globs: Patterns, callback: Option<HelperCallback<DirsHelpers>>) -> Chain<DirsHelpers, ()> {
    Ambient::current().with_step(None).sync_scope(|| {
        NodeBuilder::new("dirs")
            .arguments(move || {
                if globs.is_empty() {
                    return Err(WorkflowError::Precondition(
                        "dirs needs at least one pattern".to_string(),
                    ));
                }
                Ok(globs.clone())
            })
            .helpers(DirsHelpers::new)
            .callback_with_helpers(callback)
            .executor(|next, node| async move {
                let globs = node.arguments()?;
                let cwd = context::cwd();
                let runtime = Runtime::current();
                let found =
                    glob(&cwd, &globs, EntryKind::Directory, &runtime.config().general.ignore_dirs)?;
                tracing::debug!(
                    step = node.name(),
                    cwd = %cwd.display(),
                    patterns = %globs,
                    found = found.len(),
                    "Matched directories"
                );

                for dir in found {
                    let visit = record("dirs", module_path!(), &[dir.display().to_string()]);
                    Ambient::current()
                        .with_cwd(dir)
                        .with_parent(Some(visit))
                        .scope(next())
                        .await?;
                }
                Ok(())
            })
            .run()
    })
}
