//! File iteration steps.
//!
//! `files` makes each matching file the current file; `js_fam` adds the
//! JavaScript family helpers (import edits) and reconciles queued import
//! edits once nested work for the file is done; `js_files` does both.
//! `json` and `yaml` edit the current file as structured data.

mod context;
mod data;
mod imports;
mod js_fam;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

pub use context::FileContext;
pub use data::{json, yaml};
pub use imports::{
    find_named_imports, named_imports_query, reconcile, ImportEdit, ImportEditKind, NamedImport,
};
pub use js_fam::{
    add_import, js_fam, js_fam_with, js_files, js_files_with, remove_import, JsFamHelpers,
    JS_FILES_GLOB,
};

use crate::core::context as ambient;
use crate::core::{
    helper_callback, instrument, Chain, HelperCallback, NodeBuilder, Result, Runtime, StepScope,
};
use crate::fs::{glob, move_to, EntryKind, Patterns};
use crate::structural::{ast_grep, ast_grep_with, AstGrepHelpers};

/// Glob used by `files` when none is given.
pub const FILES_GLOB: &str = "**/*.*";

/// Helpers available inside a `files` step.
#[derive(Debug, Clone)]
pub struct FilesHelpers {
    scope: StepScope,
    default_glob: Arc<Mutex<&'static str>>,
}

impl FilesHelpers {
    fn new(scope: StepScope, default_glob: Arc<Mutex<&'static str>>) -> Self {
        Self { scope, default_glob }
    }

    /// Chained onto a `files` step without patterns, only JavaScript family
    /// files are visited.
    pub fn js_fam(&self) -> Chain<JsFamHelpers, JsFamHelpers> {
        self.narrow(JS_FILES_GLOB);
        self.scope.nest(js_fam)
    }

    pub fn js_fam_with<F, Fut>(&self, callback: F) -> Chain<JsFamHelpers, JsFamHelpers>
    where
        F: Fn(JsFamHelpers) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.narrow(JS_FILES_GLOB);
        self.scope.nest(|| js_fam_with(callback))
    }

    /// Move the current file into `target`, see [`move_to`].
    pub fn move_to(&self, target: impl Into<PathBuf>) -> Chain<(), ()> {
        let target = target.into();
        self.scope.nest(|| move_to(target))
    }

    pub fn json<F>(&self, update: F) -> Chain<(), ()>
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        self.scope.nest(|| json(update))
    }

    pub fn yaml<F>(&self, update: F) -> Chain<(), ()>
    where
        F: Fn(serde_yaml::Value) -> Result<serde_yaml::Value> + Send + Sync + 'static,
    {
        self.scope.nest(|| yaml(update))
    }

    /// Replace the glob used when the step was given no patterns.
    fn narrow(&self, glob: &'static str) {
        if self.scope.is_wrapped() {
            *self.default_glob.lock() = glob;
        }
    }

    pub fn ast_grep(&self, query: impl Into<String>) -> Chain<AstGrepHelpers, AstGrepHelpers> {
        let query = query.into();
        self.scope.nest(|| ast_grep(query))
    }

    pub fn ast_grep_with<F, Fut>(
        &self,
        query: impl Into<String>,
        callback: F,
    ) -> Chain<AstGrepHelpers, AstGrepHelpers>
    where
        F: Fn(AstGrepHelpers) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let query = query.into();
        self.scope.nest(|| ast_grep_with(query, callback))
    }
}

/// Run nested steps once per file matching `globs`.
///
/// Without patterns every file (`**/*.*`) is visited, or only JavaScript
/// family files when `js_fam` is chained onto the step.
pub fn files(globs: impl Into<Patterns>) -> Chain<FilesHelpers, ()> {
    build(globs.into(), None)
}

/// Run `callback` once per file matching `globs`.
pub fn files_with<F, Fut>(globs: impl Into<Patterns>, callback: F) -> Chain<FilesHelpers, ()>
where
    F: Fn(FilesHelpers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    build(globs.into(), Some(helper_callback(callback)))
}

fn build(globs: Patterns, callback: Option<HelperCallback<FilesHelpers>>) -> Chain<FilesHelpers, ()> {
    let recorded = globs.clone().or_default(FILES_GLOB);
    let default_glob = Arc::new(Mutex::new(FILES_GLOB));
    let fallback = Arc::clone(&default_glob);
    instrument("files", &recorded, || {
        NodeBuilder::new("files")
            .arguments(move || Ok(globs.clone().or_default(*fallback.lock())))
            .helpers(move |scope| FilesHelpers::new(scope, Arc::clone(&default_glob)))
            .callback_with_helpers(callback)
            .executor(|next, node| async move {
                for path in matching_files(node.name(), &node.arguments()?)? {
                    ambient::with_file(FileContext::new(path), next()).await?;
                }
                Ok(())
            })
            .run()
    })
}

/// Files under the current directory matching `globs`, skipping ignored directories.
pub(crate) fn matching_files(step: &str, globs: &Patterns) -> Result<Vec<PathBuf>> {
    let cwd = ambient::cwd();
    let runtime = Runtime::current();
    let found = glob(&cwd, globs, EntryKind::File, &runtime.config().general.ignore_dirs)?;
    tracing::debug!(
        step,
        cwd = %cwd.display(),
        patterns = %globs,
        found = found.len(),
        "Matched files"
    );
    Ok(found)
}
