//! JavaScript family steps: `jsFam`, `jsFiles` and import edits.

use std::future::Future;

use super::imports::{find_named_imports, reconcile, ImportEdit, NamedImport};
use super::{matching_files, FileContext};
use crate::core::context;
use crate::core::{
    helper_callback, instrument, Chain, HelperCallback, NodeBuilder, Result, Runtime, StepScope,
};
use crate::fs::Patterns;
use crate::structural::{ast_grep, ast_grep_with, AstGrepHelpers};

/// Glob used by `js_files` when none is given.
pub const JS_FILES_GLOB: &str = "**/*.{js,jsx,ts,tsx,cjs,mjs,cts,mts}";

/// Helpers for JavaScript and TypeScript files.
#[derive(Debug, Clone)]
pub struct JsFamHelpers {
    scope: StepScope,
}

impl JsFamHelpers {
    pub(crate) fn new(scope: StepScope) -> Self {
        Self { scope }
    }

    /// Queue `line` (e.g. `import { a } from "b"`) to be merged into the file.
    pub fn add_import(&self, line: impl Into<String>) -> Chain<(), ()> {
        let line = line.into();
        self.scope.nest(|| add_import(line))
    }

    /// Queue the named bindings of `line` for removal.
    pub fn remove_import(&self, line: impl Into<String>) -> Chain<(), ()> {
        let line = line.into();
        self.scope.nest(|| remove_import(line))
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

    /// Named imports of the current file as it is now.
    pub async fn get_imports(&self) -> Result<Vec<NamedImport>> {
        let file = context::file()?;
        let source = file.contents().await?;
        find_named_imports(Runtime::current().matcher().as_ref(), file.path(), &source)
    }
}

/// JavaScript helpers for the current file.
///
/// Import edits queued by nested steps are reconciled after they finish.
pub fn js_fam() -> Chain<JsFamHelpers, JsFamHelpers> {
    build_fam(None)
}

/// Run `callback` with JavaScript helpers for the current file.
pub fn js_fam_with<F, Fut>(callback: F) -> Chain<JsFamHelpers, JsFamHelpers>
where
    F: Fn(JsFamHelpers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    build_fam(Some(helper_callback(callback)))
}

fn build_fam(callback: Option<HelperCallback<JsFamHelpers>>) -> Chain<JsFamHelpers, JsFamHelpers> {
    instrument("jsFam", &(), || {
        NodeBuilder::<()>::new("jsFam")
            .helpers(JsFamHelpers::new)
            .callback_with_helpers(callback)
            .executor(|next, _| async move {
                let file = context::file()?;
                next().await?;
                reconcile_file(&file).await?;
                Ok(())
            })
            .returns_helpers()
            .run()
    })
}

/// Run nested steps with JavaScript helpers once per file matching `globs`.
///
/// Defaults to [`JS_FILES_GLOB`].
pub fn js_files(globs: impl Into<Patterns>) -> Chain<JsFamHelpers, ()> {
    build_files(globs.into(), None)
}

/// Run `callback` with JavaScript helpers once per file matching `globs`.
pub fn js_files_with<F, Fut>(globs: impl Into<Patterns>, callback: F) -> Chain<JsFamHelpers, ()>
where
    F: Fn(JsFamHelpers) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    build_files(globs.into(), Some(helper_callback(callback)))
}

fn build_files(
    globs: Patterns,
    callback: Option<HelperCallback<JsFamHelpers>>,
) -> Chain<JsFamHelpers, ()> {
    let globs = globs.or_default(JS_FILES_GLOB);
    let recorded = globs.clone();
    instrument("jsFiles", &recorded, || {
        NodeBuilder::new("jsFiles")
            .arguments(move || Ok(globs.clone()))
            .helpers(JsFamHelpers::new)
            .callback_with_helpers(callback)
            .executor(|next, node| async move {
                for path in matching_files(node.name(), &node.arguments()?)? {
                    let file = FileContext::new(path);
                    context::with_file(file.clone(), async {
                        next().await?;
                        reconcile_file(&file).await
                    })
                    .await?;
                }
                Ok(())
            })
            .run()
    })
}

/// Queue an import addition on the current file.
pub fn add_import(line: impl Into<String>) -> Chain<(), ()> {
    queue("addImport", ImportEdit::add(line))
}

/// Queue an import removal on the current file.
pub fn remove_import(line: impl Into<String>) -> Chain<(), ()> {
    queue("removeImport", ImportEdit::remove(line))
}

fn queue(name: &'static str, edit: ImportEdit) -> Chain<(), ()> {
    NodeBuilder::<()>::new(name)
        .executor(move |next, _| {
            let edit = edit.clone();
            async move {
                context::file()?.queue_import(edit);
                next().await
            }
        })
        .run()
}

/// Apply and save queued import edits. Returns whether the file was written.
async fn reconcile_file(file: &FileContext) -> Result<bool> {
    let edits = file.take_imports();
    if edits.is_empty() {
        return Ok(false);
    }

    let source = file.contents().await?;
    let matcher = Runtime::current().matcher();
    match reconcile(matcher.as_ref(), file.path(), &source, &edits)? {
        Some(updated) => {
            tracing::debug!(file = %file.path().display(), edits = edits.len(), "Reconciled imports");
            file.set_contents(updated);
            file.save().await
        }
        None => Ok(false),
    }
}
