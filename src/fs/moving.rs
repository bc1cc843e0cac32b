//! The `move` step.
//!
//! Moves the current file, or every file under the current directory, into
//! a target directory, then rewrites relative import and `require` paths in
//! JavaScript files that pointed at a moved module.

use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::{glob, EntryKind, Patterns};
use crate::core::context;
use crate::core::{instrument, Chain, NodeBuilder, Result, Runtime, WorkflowError};
use crate::files::{files, FileContext, FILES_GLOB};
use crate::structural::{ast_grep, MatchNode};

const JS_EXTENSIONS: [&str; 6] = ["js", "jsx", "ts", "tsx", "cjs", "mjs"];

const IMPORTERS_GLOB: &str = "**/*.{js,jsx,ts,tsx,cjs,mjs}";

/// Module paths of import/export statements and `require(..)` calls.
const MODULE_PATH_RULE: &str = r#"
rule:
  any:
    - kind: string_fragment
      inside:
        kind: string
        inside:
          any:
            - kind: import_statement
            - kind: export_statement
    - kind: string_fragment
      inside:
        kind: string
        inside:
          kind: arguments
          inside:
            kind: call_expression
            regex: ^require
"#;

/// Old absolute path to new absolute path, JavaScript modules only.
type Renames = BTreeMap<PathBuf, PathBuf>;

/// Move the current file, or the current directory's files, into `target`.
///
/// Inside a file context only that file moves, to `target/<name>`. Otherwise
/// every file under the working directory moves to `target/<dir name>/..`,
/// keeping its relative path, and emptied directories are removed. Relative
/// targets resolve against the process directory.
///
/// Afterwards relative module paths in JavaScript files are updated: those
/// under the working directory (a file move) or under the directory that
/// was current before it (a directory move), plus the moved files themselves.
pub fn move_to(target: impl Into<PathBuf>) -> Chain<(), ()> {
    let target = target.into();
    let recorded = [target.display().to_string()];
    instrument("move", &recorded, || {
        NodeBuilder::new("move")
            .arguments(move || {
                let base = std::env::current_dir().map_err(|err| WorkflowError::io(".", err))?;
                Ok(normalize(&base.join(&target)))
            })
            .executor(|next, node| async move {
                let target = node.arguments()?;
                let cwd = context::cwd();
                let (root, renames) = match context::try_file() {
                    Some(file) => (cwd.clone(), move_file(&file, &target).await?),
                    None => (context::enclosing_cwd(), move_dir(&cwd, &target).await?),
                };
                tracing::debug!(
                    step = node.name(),
                    target = %target.display(),
                    modules = renames.len(),
                    "Moved files"
                );
                rewrite_imports(root, renames).await?;
                next().await
            })
            .run()
    })
}

async fn move_file(file: &FileContext, target: &Path) -> Result<Renames> {
    file.save().await?;
    let source = file.path().to_path_buf();
    let Some(name) = source.file_name() else {
        return Err(WorkflowError::Precondition(format!("cannot move {}", source.display())));
    };

    let mut renames = Renames::new();
    relocate(&source, &target.join(name), &mut renames).await?;
    Ok(renames)
}

async fn move_dir(cwd: &Path, target: &Path) -> Result<Renames> {
    let Some(name) = cwd.file_name() else {
        return Err(WorkflowError::Precondition(format!("cannot move {}", cwd.display())));
    };
    let destination = target.join(name);
    let runtime = Runtime::current();
    let found = glob(
        cwd,
        &Patterns::from(FILES_GLOB),
        EntryKind::File,
        &runtime.config().general.ignore_dirs,
    )?;

    let mut renames = Renames::new();
    for source in found {
        let relative = source.strip_prefix(cwd).unwrap_or(&source);
        relocate(&source, &destination.join(relative), &mut renames).await?;
        prune_empty(source.parent(), cwd).await;
    }
    if tokio::fs::remove_dir(cwd).await.is_ok() {
        tracing::debug!(dir = %cwd.display(), "Removed emptied directory");
    }
    Ok(renames)
}

async fn relocate(source: &Path, dest: &Path, renames: &mut Renames) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| WorkflowError::io(parent, err))?;
    }
    tracing::info!(from = %source.display(), to = %dest.display(), "Moving");
    tokio::fs::rename(source, dest).await.map_err(|err| WorkflowError::io(source, err))?;
    if is_module(dest) {
        renames.insert(source.to_path_buf(), dest.to_path_buf());
    }
    Ok(())
}

/// Remove `from` and its ancestors below `stop` while they are empty.
async fn prune_empty(from: Option<&Path>, stop: &Path) {
    let mut dir = from;
    while let Some(current) = dir {
        if current == stop || !current.starts_with(stop) {
            break;
        }
        if tokio::fs::remove_dir(current).await.is_err() {
            break;
        }
        dir = current.parent();
    }
}

fn is_module(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| JS_EXTENSIONS.contains(&ext))
}

async fn rewrite_imports(root: PathBuf, renames: Renames) -> Result<()> {
    if renames.is_empty() {
        return Ok(());
    }
    let renames = Arc::new(renames);

    context::with_cwd(
        root.clone(),
        files(IMPORTERS_GLOB)
            .ast_grep(MODULE_PATH_RULE)
            .replace_with(import_updater(Arc::clone(&renames)))
            .into_future(),
    )
    .await?;

    for moved in renames.values().filter(|moved| !moved.starts_with(&root)) {
        let rewrite = ast_grep(MODULE_PATH_RULE).replace_with(import_updater(Arc::clone(&renames)));
        context::with_file(FileContext::new(moved), rewrite.into_future()).await?;
    }
    Ok(())
}

fn import_updater(
    renames: Arc<Renames>,
) -> impl Fn(&MatchNode) -> Option<String> + Send + Sync + 'static {
    move |node| {
        let file = context::try_file()?;
        rename_import(file.path(), &renames, node.text())
    }
}

/// New text for a relative module path in `importer`, if it changes.
fn rename_import(importer: &Path, renames: &Renames, import: &str) -> Option<String> {
    if !import.starts_with('.') || import.ends_with("package.json") {
        return None;
    }

    let previous = renames
        .iter()
        .find(|(_, after)| after.as_path() == importer)
        .map(|(before, _)| before.as_path());
    let old_target = normalize(&previous.unwrap_or(importer).parent()?.join(import));
    let new_target = match (renamed(&old_target, renames), previous) {
        (Some(new_target), _) => new_target,
        (None, Some(_)) => old_target,
        (None, None) => return None,
    };

    let mut relative = relative_path(importer.parent()?, &new_target);
    if !relative.starts_with('.') {
        relative = format!("./{}", relative);
    }
    let relative = import_extension(&relative);
    (relative != import).then_some(relative)
}

/// Where the module at `old` went, guessing omitted extensions and `index` files.
fn renamed(old: &Path, renames: &Renames) -> Option<PathBuf> {
    if let Some(new) = renames.get(old) {
        return Some(new.clone());
    }

    let text = old.to_str()?;
    if let Some((file, query)) = text.split_once('?') {
        if let Some(new) = renames.get(Path::new(file)) {
            return Some(PathBuf::from(format!("{}?{}", new.display(), query)));
        }
    }

    for ext in JS_EXTENSIONS {
        if let Some(new) = renames.get(&PathBuf::from(format!("{}.{}", text, ext))) {
            return Some(new.with_extension(""));
        }
    }

    let index = old.join("index");
    JS_EXTENSIONS
        .iter()
        .find_map(|ext| renames.get(&index.with_extension(ext)))
        .and_then(|new| new.parent().map(Path::to_path_buf))
}

/// `.ts` imports are written as `.js`; `.tsx` and `.jsx` lose the extension.
fn import_extension(path: &str) -> String {
    match Path::new(path).extension().and_then(|ext| ext.to_str()) {
        Some("ts") => format!("{}js", &path[..path.len() - 2]),
        Some(ext @ ("tsx" | "jsx")) => path[..path.len() - ext.len() - 1].to_string(),
        _ => path.to_string(),
    }
}

/// Resolve `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// `to` relative to the directory `from`, with `/` separators.
fn relative_path(from: &Path, to: &Path) -> String {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let shared = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - shared];
    parts.extend(to[shared..].iter().map(|part| part.as_os_str().to_string_lossy().into_owned()));
    parts.join("/")
}
