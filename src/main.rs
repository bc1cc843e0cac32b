//! Modflow - workflow engine for code migrations.
//!
//! The binary wires the built-in steps into one-shot pipelines: run a
//! command across directories, edit imports, rewrite patterns, sync
//! repositories or patch matches with an LLM.

#![allow(clippy::single_match_else)]

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use modflow::core::{Config, MigrationRunner, Runtime};
use modflow::files::{FILES_GLOB, JS_FILES_GLOB};
use modflow::Patterns;

/// Workflow engine for code migrations
#[derive(Parser)]
#[command(name = "modflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to .modflow.toml, then the user config dir)
    #[arg(long, global = true, env = "MODFLOW_CONFIG")]
    config: Option<String>,

    /// Working directory for the pipeline
    #[arg(long, global = true)]
    cwd: Option<String>,

    /// Print the execution tree as JSON when done
    #[arg(long, global = true)]
    print_tree: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command in the working directory or in each matching directory
    Exec {
        /// Directory globs to run in, e.g. "apps/*"
        #[arg(short, long)]
        dirs: Option<String>,

        /// Program to run
        command: String,

        /// Program arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Add named imports to JavaScript/TypeScript files
    AddImport {
        /// Import statement, e.g. 'import { a } from "b"'
        import: String,

        /// File globs
        #[arg(short, long, default_value = JS_FILES_GLOB)]
        files: String,
    },

    /// Remove named imports from JavaScript/TypeScript files
    RemoveImport {
        /// Import statement naming the bindings to drop
        import: String,

        /// File globs
        #[arg(short, long, default_value = JS_FILES_GLOB)]
        files: String,
    },

    /// Rewrite every match of a structural pattern
    Replace {
        /// Pattern or YAML rule, e.g. 'console.log($$$ARGS)'
        pattern: String,

        /// Replacement template, e.g. 'logger.info($$$ARGS)'
        template: String,

        /// File globs
        #[arg(short, long, default_value = FILES_GLOB)]
        files: String,
    },

    /// Clone (or reuse) repositories and optionally switch branches
    #[cfg(feature = "git")]
    Clone {
        /// Repository URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Branches to check out in each repository
        #[arg(short, long)]
        branches: Option<String>,

        /// Clone with depth 1
        #[arg(long)]
        shallow: bool,
    },

    /// Patch structural matches with an LLM
    #[cfg(feature = "ai")]
    Ai {
        /// Instruction for the model
        prompt: String,

        /// Pattern or YAML rule selecting the code to patch
        #[arg(short, long)]
        query: String,

        /// File globs
        #[arg(short, long, default_value = FILES_GLOB)]
        files: String,

        /// Override the configured model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Exec { .. } => "exec",
            Self::AddImport { .. } => "add-import",
            Self::RemoveImport { .. } => "remove-import",
            Self::Replace { .. } => "replace",
            #[cfg(feature = "git")]
            Self::Clone { .. } => "clone",
            #[cfg(feature = "ai")]
            Self::Ai { .. } => "ai",
            Self::Completions { .. } => "completions",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return Ok(());
    }

    if let Some(dir) = &cli.cwd {
        let dir = expand_path(dir);
        std::env::set_current_dir(&dir)
            .with_context(|| format!("Cannot change directory to {}", dir.display()))?;
    }

    // Best effort: a missing .env is fine
    let _ = dotenvy::dotenv();

    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli.command);

    let runtime = Runtime::builder().config(config).build();
    if Runtime::install(runtime.clone()).is_err() {
        anyhow::bail!("Runtime already installed");
    }

    let name = cli.command.name();
    let runner = MigrationRunner::new().step(name, move || pipeline(cli.command));

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(runner.run());

    if cli.print_tree {
        println!("{}", serde_json::to_string_pretty(&runtime.registry().snapshot())?);
    }

    if let Some(failed) = report.failed().next() {
        anyhow::bail!(
            "{} failed: {}",
            failed.name,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => {
            let path = expand_path(path);
            Config::load_from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        None => Config::load(),
    }
}

fn apply_overrides(config: &mut Config, command: &Commands) {
    match command {
        #[cfg(feature = "git")]
        Commands::Clone { shallow: true, .. } => config.git.shallow = true,
        #[cfg(feature = "ai")]
        Commands::Ai { model: Some(model), .. } => config.ai.model = model.clone(),
        _ => {}
    }
}

/// Build and await the pipeline for one subcommand.
async fn pipeline(command: Commands) -> Result<()> {
    match command {
        Commands::Exec { dirs, command, args } => cmd_exec(dirs, command, args).await,
        Commands::AddImport { import, files } => {
            modflow::js_files(files.as_str()).add_import(import).await?;
            Ok(())
        }
        Commands::RemoveImport { import, files } => {
            modflow::js_files(files.as_str()).remove_import(import).await?;
            Ok(())
        }
        Commands::Replace { pattern, template, files } => {
            modflow::files(files.as_str()).ast_grep(pattern).replace(template).await?;
            Ok(())
        }
        #[cfg(feature = "git")]
        Commands::Clone { urls, branches, .. } => cmd_clone(urls, branches).await,
        #[cfg(feature = "ai")]
        Commands::Ai { prompt, query, files, .. } => {
            let report = modflow::files(files.as_str()).ast_grep(query).ai(prompt).await?;
            for file in &report.written {
                println!("patched {}", file.display());
            }
            for file in &report.skipped {
                eprintln!("skipped {}", file.display());
            }
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// Run a command once, or once per matching directory.
async fn cmd_exec(dirs: Option<String>, command: String, args: Vec<String>) -> Result<()> {
    match dirs {
        None => {
            for output in modflow::exec(&command, args).await? {
                print_stdout(&output.stdout);
            }
        }
        Some(globs) => {
            modflow::dirs_with(Patterns::from(globs), move |dir| {
                let command = command.clone();
                let args = args.clone();
                async move {
                    for output in dir.exec(&command, args).await? {
                        print_stdout(&output.stdout);
                    }
                    Ok(())
                }
            })
            .await?;
        }
    }
    Ok(())
}

fn print_stdout(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

/// Sync each repository and print where it lives.
#[cfg(feature = "git")]
async fn cmd_clone(urls: Vec<String>, branches: Option<String>) -> Result<()> {
    use modflow::core::context;

    fn report() -> modflow::Result<()> {
        let repository = context::repository()?;
        println!("{} {} {}", repository.url, repository.branch, context::cwd().display());
        Ok(())
    }

    modflow::repositories_with(Patterns::from(urls), move |repo| {
        let branches = branches.clone();
        async move {
            match branches {
                Some(names) => repo.branches_with(names, |_| async { report() }).await,
                None => report(),
            }
        }
    })
    .await?;
    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "modflow", &mut io::stdout());
}
