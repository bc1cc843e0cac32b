//! Structural code search.
//!
//! Matching engines implement [`Matcher`]: given a file, its source text and
//! a [`Query`] they return [`MatchNode`]s with byte ranges and named captures.
//! The default [`AstGrepMatcher`] parses the file with the tree-sitter grammar
//! for its extension; other engines plug in through the runtime.

mod ast_grep;
mod engine;
mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use serde_yaml::Value;

pub use ast_grep::{ast_grep, ast_grep_with, exists, map, replace, replace_with, AstGrepHelpers};
pub use engine::{language_for, AstGrepMatcher};
pub use template::render_template;

use crate::core::{Result, WorkflowError};
use crate::files::FileContext;

/// What to search for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// A code pattern with `$NAME` / `$$$NAME` metavariables
    Pattern(String),

    /// Matches of any sub-query
    Any(Vec<Query>),

    /// Any other ast-grep rule (`kind`, `inside`, `regex`, ...), as YAML
    Rule(String),
}

impl Query {
    /// Parse a pattern string or a YAML rule.
    ///
    /// YAML input is a mapping with a `rule` key. A rule that is only a
    /// string `pattern`, or only an `any` of such rules, becomes
    /// [`Query::Pattern`] / [`Query::Any`]; other rules are kept whole.
    /// Input that is not such a mapping is taken as a plain pattern.
    pub fn parse(input: &str) -> Result<Self> {
        if let Ok(Value::Mapping(map)) = serde_yaml::from_str::<Value>(input) {
            if let Some(rule) = map.get("rule") {
                return Self::from_rule(rule);
            }
        }
        Ok(Self::Pattern(input.trim().to_string()))
    }

    /// Create a query matching any of the given patterns.
    pub fn any<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Any(patterns.into_iter().map(|p| Self::Pattern(p.into())).collect())
    }

    fn from_rule(rule: &Value) -> Result<Self> {
        if !rule.is_mapping() {
            return Err(WorkflowError::Pattern("rule must be a mapping".to_string()));
        }
        if let Some(simple) = Self::simple(rule) {
            return Ok(simple);
        }
        serde_yaml::to_string(rule)
            .map(Self::Rule)
            .map_err(|err| WorkflowError::Pattern(err.to_string()))
    }

    fn simple(rule: &Value) -> Option<Self> {
        let Value::Mapping(map) = rule else {
            return None;
        };
        if map.len() != 1 {
            return None;
        }
        match (map.get("pattern"), map.get("any")) {
            (Some(Value::String(text)), _) => Some(Self::Pattern(text.clone())),
            (_, Some(Value::Sequence(items))) => {
                items.iter().map(Self::simple).collect::<Option<Vec<_>>>().map(Self::Any)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(pattern) => f.write_str(pattern),
            Self::Any(items) => {
                writeln!(f, "rule:")?;
                writeln!(f, "  any:")?;
                for item in items {
                    writeln!(f, "    - pattern: {:?}", item.to_string())?;
                }
                Ok(())
            }
            Self::Rule(yaml) => {
                writeln!(f, "rule:")?;
                for line in yaml.lines() {
                    writeln!(f, "  {}", line)?;
                }
                Ok(())
            }
        }
    }
}

/// One match (or capture) in a source text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchNode {
    text: String,
    range: Range<usize>,
    single: BTreeMap<String, MatchNode>,
    multiple: BTreeMap<String, Vec<MatchNode>>,
}

impl MatchNode {
    pub fn new(text: impl Into<String>, range: Range<usize>) -> Self {
        Self { text: text.into(), range, ..Self::default() }
    }

    #[must_use]
    pub fn with_match(mut self, name: impl Into<String>, node: MatchNode) -> Self {
        self.single.insert(name.into(), node);
        self
    }

    #[must_use]
    pub fn with_multiple(mut self, name: impl Into<String>, nodes: Vec<MatchNode>) -> Self {
        self.multiple.insert(name.into(), nodes);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte range in the searched source.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Capture of `$NAME`, or the whole span of `$$$NAME`.
    pub fn get_match(&self, name: &str) -> Option<&MatchNode> {
        self.single.get(name)
    }

    /// Items captured by `$$$NAME`.
    pub fn get_multiple_matches(&self, name: &str) -> &[MatchNode] {
        self.multiple.get(name).map_or(&[], Vec::as_slice)
    }
}

/// A structural matching engine.
pub trait Matcher: Send + Sync {
    /// Engine name.
    fn name(&self) -> &str;

    /// All non-overlapping matches in document order.
    ///
    /// `path` names the file `source` was read from and selects the grammar.
    fn find_all(&self, path: &Path, source: &str, query: &Query) -> Result<Vec<MatchNode>>;
}

/// Active match while visiting search results.
#[derive(Debug, Clone)]
pub struct MatchContext {
    query: Arc<Query>,
    node: MatchNode,
    file: FileContext,
}

impl MatchContext {
    pub fn new(query: Arc<Query>, node: MatchNode, file: FileContext) -> Self {
        Self { query, node, file }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn node(&self) -> &MatchNode {
        &self.node
    }

    /// File the match was found in.
    pub fn file(&self) -> &FileContext {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_pattern() {
        assert_eq!(
            Query::parse("console.log($A)").unwrap(),
            Query::Pattern("console.log($A)".to_string())
        );
        assert_eq!(
            Query::parse("import React from 'react'").unwrap(),
            Query::Pattern("import React from 'react'".to_string())
        );
    }

    #[test]
    fn test_yaml_rules() {
        let query = Query::parse("rule:\n  any:\n    - pattern: a()\n    - pattern: b()\n").unwrap();
        assert_eq!(query, Query::any(["a()", "b()"]));

        let query = Query::parse(
            "rule:\n  pattern:\n    context: \"foo($A)\"\n    strictness: relaxed\n",
        )
        .unwrap();
        let Query::Rule(yaml) = query else { panic!("expected a full rule") };
        assert!(yaml.contains("strictness: relaxed"));

        let query = Query::parse("rule:\n  kind: identifier\n  regex: ^use\n").unwrap();
        assert!(matches!(&query, Query::Rule(yaml) if yaml.contains("kind: identifier")));
        assert!(query.to_string().starts_with("rule:\n  kind: identifier"));

        assert!(Query::parse("rule: 3\n").is_err());
    }

    #[test]
    fn test_match_node_captures() {
        let node = MatchNode::new("f(a, b)", 0..7)
            .with_match("ARGS", MatchNode::new("a, b", 2..6))
            .with_multiple("ARGS", vec![MatchNode::new("a", 2..3), MatchNode::new("b", 5..6)]);
        assert_eq!(node.get_match("ARGS").unwrap().text(), "a, b");
        assert_eq!(node.get_multiple_matches("ARGS").len(), 2);
        assert!(node.get_multiple_matches("NONE").is_empty());
        assert!(node.get_match("NONE").is_none());
    }
}
