//! File system helpers: pattern lists, glob walking, temp directories and
//! the `dirs` and `move` steps.

mod dirs;
mod glob;
mod moving;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use dirs::{dirs, dirs_with, DirsHelpers};
pub use glob::{glob, EntryKind};
pub use moving::move_to;

use crate::core::Runtime;

/// A list of glob patterns, URLs or names.
///
/// String inputs are split on newlines, commas, semicolons and spaces,
/// except inside `{..}` alternations, and empty items are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Patterns(Vec<String>);

impl Patterns {
    pub fn parse(input: &str) -> Self {
        Self(parse_multistring(input))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// These patterns, or `default` when there are none.
    pub fn or_default(self, default: &str) -> Self {
        if self.is_empty() {
            Self::parse(default)
        } else {
            self
        }
    }
}

impl fmt::Display for Patterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

impl<'a> IntoIterator for &'a Patterns {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<&str> for Patterns {
    fn from(input: &str) -> Self {
        Self::parse(input)
    }
}

impl From<String> for Patterns {
    fn from(input: String) -> Self {
        Self::parse(&input)
    }
}

impl From<&String> for Patterns {
    fn from(input: &String) -> Self {
        Self::parse(input)
    }
}

impl<S: AsRef<str>> From<Vec<S>> for Patterns {
    fn from(items: Vec<S>) -> Self {
        Self(items.iter().flat_map(|item| parse_multistring(item.as_ref())).collect())
    }
}

impl<S: AsRef<str>> From<&[S]> for Patterns {
    fn from(items: &[S]) -> Self {
        Self(items.iter().flat_map(|item| parse_multistring(item.as_ref())).collect())
    }
}

impl<S: AsRef<str>, const N: usize> From<[S; N]> for Patterns {
    fn from(items: [S; N]) -> Self {
        Self(items.iter().flat_map(|item| parse_multistring(item.as_ref())).collect())
    }
}

/// Split a multi-valued string argument.
pub fn parse_multistring(input: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in input.chars() {
        match c {
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '\n' | '\r' | ',' | ';' | ' ' | '\t' if depth == 0 => {
                if !current.is_empty() {
                    items.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        items.push(current);
    }
    items
}

/// Lowercase `input` and collapse every non-alphanumeric run into one dash.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Deterministic directory under the OS temp dir, one slugified segment per part.
pub fn tmp_dir<I, S>(parts: I) -> PathBuf
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let runtime = Runtime::current();
    let mut path = std::env::temp_dir().join(&runtime.config().general.tmp_dir_name);
    for part in parts {
        path.push(slugify(part.as_ref()));
    }
    path
}

/// Whether `path` is an existing directory.
pub async fn is_directory(path: impl AsRef<Path>) -> bool {
    tokio::fs::metadata(path).await.map(|meta| meta.is_dir()).unwrap_or(false)
}
