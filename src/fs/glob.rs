//! Glob walking.
//!
//! Relative patterns are gitignore-style globs anchored at the root
//! (`*.ts` matches only top-level files, `**/*.ts` matches at any depth).
//! A leading `!` excludes. Absolute patterns name paths directly.

use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use walkdir::WalkDir;

use super::Patterns;
use crate::core::{Result, WorkflowError};

/// What a walk collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    fn accepts(self, is_dir: bool, is_file: bool) -> bool {
        match self {
            Self::File => is_file,
            Self::Directory => is_dir,
        }
    }
}

fn anchor(pattern: &str) -> String {
    let (negated, body) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };
    let body = body.trim_start_matches("./");
    let anchored = if body.starts_with('/') { body.to_string() } else { format!("/{}", body) };
    if negated {
        format!("!{}", anchored)
    } else {
        anchored
    }
}

/// Entries of `kind` under `root` matching `patterns`, sorted by path.
///
/// Directories named in `ignore_dirs` are never descended into.
pub fn glob(
    root: &Path,
    patterns: &Patterns,
    kind: EntryKind,
    ignore_dirs: &[String],
) -> Result<Vec<PathBuf>> {
    let (absolute, relative): (Vec<&String>, Vec<&String>) =
        patterns.iter().partition(|pattern| Path::new(pattern.as_str()).is_absolute());

    let mut found = Vec::new();

    if !relative.is_empty() {
        let mut builder = OverrideBuilder::new(root);
        for pattern in &relative {
            builder
                .add(&anchor(pattern))
                .map_err(|err| WorkflowError::Pattern(format!("{}: {}", pattern, err)))?;
        }
        let overrides = builder.build().map_err(|err| WorkflowError::Pattern(err.to_string()))?;

        let walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter().filter_entry(
            |entry| {
                !(entry.file_type().is_dir()
                    && ignore_dirs.iter().any(|name| entry.file_name() == name.as_str()))
            },
        );

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(root = %root.display(), error = %err, "Skipping unreadable entry");
                    continue;
                }
            };
            let file_type = entry.file_type();
            if !kind.accepts(file_type.is_dir(), file_type.is_file()) {
                continue;
            }
            let relative_path = entry.path().strip_prefix(root).unwrap_or(entry.path());
            if overrides.matched(relative_path, file_type.is_dir()).is_whitelist() {
                found.push(entry.into_path());
            }
        }
    }

    for pattern in absolute {
        let path = PathBuf::from(pattern);
        if kind.accepts(path.is_dir(), path.is_file()) {
            found.push(path);
        } else {
            tracing::warn!(path = %path.display(), "Skipping missing path");
        }
    }

    Ok(found)
}
