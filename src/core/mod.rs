//! Core engine for modflow.
//!
//! This module contains the pieces every step is built from: the ambient
//! context store, lazy values, the node builder, the execution tree,
//! process spawning, configuration and the runtime tying them together.

mod builder;
mod config;
pub mod context;
mod error;
mod executor;
mod lazy;
mod runner;
mod runtime;
mod tree;

pub use builder::{
    finish, helper_callback, Chain, HelperCallback, Next, Node, NodeBuilder, StepFuture, StepScope,
    Wrapper,
};
pub use config::{Config, GeneralConfig, SpawnConfig};
#[cfg(feature = "ai")]
pub use config::AiConfig;
#[cfg(feature = "git")]
pub use config::GitConfig;
pub use context::{Ambient, RepositoryContext};
pub use error::{ContextKind, Result, WorkflowError};
pub use executor::{render_command, spawn, SpawnOptions, SpawnOutput};
pub use lazy::{Lazy, LazyFuture, Settle};
pub use runner::{MigrationRunner, RunReport, StepReport};
pub use runtime::{Runtime, RuntimeBuilder};
pub use tree::{instrument, record, ExecutionNode, NodeSnapshot, TreeRegistry};
