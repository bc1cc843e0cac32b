//! # Modflow
//!
//! Composable workflow engine for code migrations.
//!
//! A workflow is a chain of lazy steps: iterate directories, iterate files,
//! run a command, clone repositories, rewrite code structurally or hand
//! matches to an LLM for patching. Each step exposes further steps as
//! helpers, and "where am I" (current directory, file, repository, match)
//! travels implicitly with the task instead of through parameters.
//!
//! ## Features
//!
//! - **Lazy pipelines**: nothing runs until a chain is awaited
//! - **Ambient context**: nested steps see the directory, file and repository they run in
//! - **Execution tree**: every step records where it ran, exportable as JSON
//! - **Import editing**: queued `add_import` / `remove_import` edits reconciled per file
//! - **Moves**: relocate files or directories and rewrite the imports that point at them
//! - **Data files**: edit JSON and YAML files as values
//! - **Git**: clone-or-reuse repositories and switch branches (feature `git`)
//! - **AI patching**: labelled prompts over structural matches (feature `ai`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use modflow::fs::dirs_with;
//!
//! # async fn migrate() -> modflow::core::Result<()> {
//! dirs_with("apps/*", |dir| async move {
//!     dir.js_files("**/*.ts").add_import("import { x } from \"y\"").await
//! })
//! .await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::redundant_else)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::redundant_clone)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::future_not_send)]
#![allow(clippy::type_complexity)]

pub mod core;
pub mod exec;
pub mod files;
pub mod fs;
pub mod structural;

#[cfg(feature = "ai")]
pub mod ai;

#[cfg(feature = "ai")]
pub use ai::{ai, CompletionService, OpenAiCompletion, PatchReport};

#[cfg(feature = "git")]
pub mod git;

#[cfg(feature = "git")]
pub use git::{branches, branches_with, repositories, repositories_with, GitRepository};

// Re-export commonly used types
pub use crate::core::{Config, MigrationRunner, Result, Runtime, WorkflowError};
pub use exec::{exec, exec_with_options};
pub use files::{
    files, files_with, js_fam, js_fam_with, js_files, js_files_with, json, yaml, FileContext,
};
pub use fs::{dirs, dirs_with, move_to, Patterns};
pub use structural::{ast_grep, ast_grep_with, AstGrepMatcher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "modflow";
