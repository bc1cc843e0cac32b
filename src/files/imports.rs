//! Named import reconciliation.
//!
//! Import edits queued while a file is current are merged into the file's
//! `import { .. } from ".."` statements once all nested work for the file has
//! finished. The final binding list of every statement is computed from all
//! edits first; only statements whose list actually changed are rewritten.

use std::ops::Range;
use std::path::Path;

use crate::core::Result;
use crate::structural::{Matcher, Query};

/// Kind of queued import edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportEditKind {
    Add,
    Remove,
}

/// One queued import change: a full import statement to merge in or take out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEdit {
    pub kind: ImportEditKind,
    pub line: String,
}

impl ImportEdit {
    pub fn add(line: impl Into<String>) -> Self {
        Self { kind: ImportEditKind::Add, line: line.into() }
    }

    pub fn remove(line: impl Into<String>) -> Self {
        Self { kind: ImportEditKind::Remove, line: line.into() }
    }
}

/// A named import statement found in a source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedImport {
    /// Module source, without quotes
    pub source: String,

    /// Named bindings in statement order
    pub bindings: Vec<String>,

    /// Byte range of the statement, without a trailing `;`
    pub range: Range<usize>,

    /// Quote character around the source
    pub quote: char,
}

/// Query matching named import statements; `$FROM` is the quoted module.
pub fn named_imports_query() -> Query {
    Query::Pattern("import { $$$IMPORTS } from $FROM".to_string())
}

/// All named import statements in `source`, in document order.
///
/// `path` is the file `source` belongs to and picks the grammar.
pub fn find_named_imports(
    matcher: &dyn Matcher,
    path: &Path,
    source: &str,
) -> Result<Vec<NamedImport>> {
    let nodes = matcher.find_all(path, source, &named_imports_query())?;
    Ok(nodes
        .into_iter()
        .filter_map(|node| {
            let from = node.get_match("FROM")?.text();
            let quote = from.chars().next().filter(|c| matches!(c, '\'' | '"' | '`'))?;
            let module = from.strip_prefix(quote)?.strip_suffix(quote)?.to_string();
            let bindings = node
                .get_multiple_matches("IMPORTS")
                .iter()
                .map(|binding| binding.text().trim().to_string())
                .filter(|binding| !binding.is_empty())
                .collect();
            let mut range = node.range();
            if source[range.clone()].ends_with(';') {
                range.end -= 1;
            }
            Some(NamedImport { source: module, bindings, range, quote })
        })
        .collect())
}

/// Apply queued edits to `source`.
///
/// Returns `None` when the edits leave every statement as it was.
pub fn reconcile(
    matcher: &dyn Matcher,
    path: &Path,
    source: &str,
    edits: &[ImportEdit],
) -> Result<Option<String>> {
    if edits.is_empty() {
        return Ok(None);
    }

    let existing = find_named_imports(matcher, path, source)?;
    let mut finals: Vec<Vec<String>> = existing.iter().map(|i| i.bindings.clone()).collect();
    let mut created: Vec<(String, Vec<String>)> = Vec::new();

    for edit in edits {
        let requested = find_named_imports(matcher, path, &edit.line)?;
        if requested.is_empty() {
            tracing::warn!(line = %edit.line, "Ignoring import edit without named imports");
            continue;
        }

        for request in requested {
            let owners: Vec<usize> = existing
                .iter()
                .enumerate()
                .filter(|(_, statement)| statement.source == request.source)
                .map(|(index, _)| index)
                .collect();

            for binding in request.bindings {
                match edit.kind {
                    ImportEditKind::Add => {
                        if let Some(&first) = owners.first() {
                            if !owners.iter().any(|&i| finals[i].contains(&binding)) {
                                finals[first].push(binding);
                            }
                        } else {
                            let index = match created.iter().position(|(s, _)| *s == request.source) {
                                Some(index) => index,
                                None => {
                                    created.push((request.source.clone(), Vec::new()));
                                    created.len() - 1
                                }
                            };
                            let list = &mut created[index].1;
                            if !list.contains(&binding) {
                                list.push(binding);
                            }
                        }
                    }
                    ImportEditKind::Remove => {
                        for &i in &owners {
                            finals[i].retain(|b| *b != binding);
                        }
                        if let Some((_, list)) = created.iter_mut().find(|(s, _)| *s == request.source) {
                            list.retain(|b| *b != binding);
                        }
                    }
                }
            }
        }
    }

    let mut splices: Vec<(Range<usize>, String)> = Vec::new();
    for (statement, bindings) in existing.iter().zip(&finals) {
        if *bindings == statement.bindings {
            continue;
        }
        if bindings.is_empty() {
            splices.push((statement_span(source, &statement.range), String::new()));
        } else {
            splices.push((statement.range.clone(), render(&statement.source, bindings, statement.quote)));
        }
    }

    let inserted: Vec<String> = created
        .iter()
        .filter(|(_, bindings)| !bindings.is_empty())
        .map(|(from, bindings)| {
            let quote = existing.first().map_or('"', |statement| statement.quote);
            format!("{};", render(from, bindings, quote))
        })
        .collect();

    if !inserted.is_empty() {
        let block = inserted.join("\n");
        match insertion_point(source, &existing) {
            Some(offset) => {
                let absorbed = splices
                    .iter_mut()
                    .find(|(range, text)| text.is_empty() && range.start <= offset && offset < range.end);
                match absorbed {
                    Some((_, text)) => *text = format!("{}\n", block),
                    None => splices.push((offset..offset, format!("\n{}", block))),
                }
            }
            None => splices.push((0..0, format!("{}\n", block))),
        }
    }

    if splices.is_empty() {
        return Ok(None);
    }

    splices.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut output = source.to_string();
    for (range, text) in splices {
        output.replace_range(range, &text);
    }

    Ok((output != source).then_some(output))
}

fn render(source: &str, bindings: &[String], quote: char) -> String {
    format!("import {{ {} }} from {q}{}{q}", bindings.join(", "), source, q = quote)
}

/// Statement range extended over a trailing `;` and line break.
fn statement_span(source: &str, range: &Range<usize>) -> Range<usize> {
    let rest = &source[range.end..];
    let mut end = range.end;
    if rest.starts_with(';') {
        end += 1;
    }
    if source[end..].starts_with("\r\n") {
        end += 2;
    } else if source[end..].starts_with('\n') {
        end += 1;
    }
    range.start..end
}

/// End of the line holding the last import statement.
fn insertion_point(source: &str, existing: &[NamedImport]) -> Option<usize> {
    let mut offset = 0;
    let mut by_line = None;
    for line in source.split_inclusive('\n') {
        let text = line.trim_end_matches(['\r', '\n']);
        if text.starts_with("import ") || text.starts_with("import{") {
            by_line = Some(offset + text.len());
        }
        offset += line.len();
    }
    let by_statement = existing.last().map(|statement| {
        source[statement.range.end..]
            .find('\n')
            .map_or(source.len(), |offset| statement.range.end + offset)
    });
    by_line.into_iter().chain(by_statement).max()
}
