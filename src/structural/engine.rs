//! Tree-sitter backed matcher.
//!
//! Queries are compiled into ast-grep rule configs for the language picked
//! from the file extension, so matches respect syntax: a pattern never
//! matches inside a string or a comment.

use std::path::Path;

use ast_grep_config::{RuleConfig, SerializableRuleConfig};
use ast_grep_core::meta_var::MetaVariable;
use ast_grep_core::tree_sitter::StrDoc;
use ast_grep_core::{AstGrep, Node, NodeMatch};
use ast_grep_language::SupportLang;
use serde_yaml::{Mapping, Value};

use super::{MatchNode, Matcher, Query};
use crate::core::{Result, WorkflowError};

/// File extension to ast-grep language name.
const LANGUAGES: &[(&str, &str)] = &[
    ("js", "javascript"),
    ("jsx", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("ts", "typescript"),
    ("mts", "typescript"),
    ("cts", "typescript"),
    ("tsx", "tsx"),
    ("css", "css"),
    ("html", "html"),
    ("json", "json"),
    ("sh", "bash"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("ex", "elixir"),
    ("exs", "elixir"),
    ("go", "go"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("lua", "lua"),
    ("php", "php"),
    ("py", "python"),
    ("py3", "python"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("scala", "scala"),
    ("swift", "swift"),
    ("yml", "yaml"),
    ("yaml", "yaml"),
];

type SgNode<'r> = Node<'r, StrDoc<SupportLang>>;

/// Language name for a file, if a grammar is bundled for its extension.
pub fn language_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?;
    LANGUAGES.iter().find(|(ext, _)| *ext == extension).map(|(_, name)| *name)
}

/// Matcher running queries through ast-grep.
#[derive(Debug, Default, Clone, Copy)]
pub struct AstGrepMatcher;

impl AstGrepMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Matcher for AstGrepMatcher {
    fn name(&self) -> &str {
        "ast-grep"
    }

    fn find_all(&self, path: &Path, source: &str, query: &Query) -> Result<Vec<MatchNode>> {
        let Some(name) = language_for(path) else {
            tracing::warn!(file = %path.display(), "Unsupported file extension, skipping search");
            return Ok(Vec::new());
        };
        let lang: SupportLang = name
            .parse()
            .map_err(|err| WorkflowError::Pattern(format!("language `{}`: {}", name, err)))?;
        let config = rule_config(name, query)?;

        let grep = AstGrep::new(source, lang);
        let found = grep.root().find_all(&config.matcher).map(|m| convert(source, &m)).collect();
        Ok(found)
    }
}

fn rule_config(language: &str, query: &Query) -> Result<RuleConfig<SupportLang>> {
    let mut config = Mapping::new();
    config.insert("id".into(), "modflow".into());
    config.insert("language".into(), language.into());
    config.insert("rule".into(), rule_value(query)?);

    let config: SerializableRuleConfig<SupportLang> = serde_yaml::from_value(Value::Mapping(config))
        .map_err(|err| WorkflowError::Pattern(format!("invalid rule: {}", err)))?;
    RuleConfig::try_from(config, &Default::default())
        .map_err(|err| WorkflowError::Pattern(err.to_string()))
}

fn rule_value(query: &Query) -> Result<Value> {
    let rule = match query {
        Query::Pattern(pattern) if pattern.trim().is_empty() => {
            return Err(WorkflowError::Pattern("pattern is empty".to_string()));
        }
        Query::Pattern(pattern) => single("pattern", pattern.as_str().into()),
        Query::Any(items) => {
            let items = items.iter().map(rule_value).collect::<Result<Vec<_>>>()?;
            single("any", Value::Sequence(items))
        }
        Query::Rule(yaml) => serde_yaml::from_str(yaml)
            .map_err(|err| WorkflowError::Pattern(format!("invalid rule: {}", err)))?,
    };
    Ok(rule)
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Mapping::new();
    map.insert(key.into(), value);
    Value::Mapping(map)
}

fn capture(node: &SgNode<'_>) -> MatchNode {
    MatchNode::new(node.text(), node.range())
}

fn convert(source: &str, found: &NodeMatch<'_, StrDoc<SupportLang>>) -> MatchNode {
    let env = found.get_env();
    let mut node = capture(found);

    for variable in env.get_matched_variables() {
        match variable {
            MetaVariable::Capture(name, _) => {
                if let Some(captured) = env.get_match(&name) {
                    node = node.with_match(name, capture(captured));
                }
            }
            MetaVariable::MultiCapture(name) => {
                let items = env.get_multiple_matches(&name);
                if let (Some(first), Some(last)) = (items.first(), items.last()) {
                    let span = first.range().start..last.range().end;
                    let text = source.get(span.clone()).unwrap_or_default();
                    node = node.with_match(name.clone(), MatchNode::new(text, span));
                }
                let named = items.iter().filter(|item| item.is_named()).map(capture).collect();
                node = node.with_multiple(name, named);
            }
            _ => {}
        }
    }
    node
}
