//! Error taxonomy for workflow execution.
//!
//! Errors are clonable: a settled [`Lazy`](super::Lazy) replays the same
//! failure to every subscriber, so the underlying sources are shared.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Named ambient contexts a step may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    WorkingDirectory,
    File,
    Repository,
    Repositories,
    StructuralMatch,
    Step,
}

impl ContextKind {
    /// Get the context name used in messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkingDirectory => "working-directory",
            Self::File => "current-file",
            Self::Repository => "current-repository",
            Self::Repositories => "current-repository-set",
            Self::StructuralMatch => "current-structural-match",
            Self::Step => "current-step",
        }
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowError {
    #[error("No {0} context is active")]
    MissingContext(ContextKind),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("Git error: {0}")]
    Git(String),

    #[error("AI error: {0}")]
    Ai(String),

    #[error("Invalid pattern: {0}")]
    Pattern(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("{0}")]
    Message(String),
}

impl WorkflowError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().to_path_buf(), source: Arc::new(source) }
    }

    /// Create a free-form error.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Check whether this error is a missing-context failure.
    pub fn is_missing_context(&self) -> bool {
        matches!(self, Self::MissingContext(_))
    }
}

#[cfg(feature = "git")]
impl From<git2::Error> for WorkflowError {
    fn from(err: git2::Error) -> Self {
        Self::Git(err.message().to_string())
    }
}

impl From<tokio::task::JoinError> for WorkflowError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Message(format!("Background task failed: {}", err))
    }
}

/// Result alias used throughout the engine.
pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_context_display() {
        let err = WorkflowError::MissingContext(ContextKind::File);
        assert_eq!(err.to_string(), "No current-file context is active");
        assert!(err.is_missing_context());
    }

    #[test]
    fn test_io_error_is_clonable() {
        let err = WorkflowError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        let cloned = err.clone();
        assert!(cloned.to_string().contains("/tmp/x"));
        assert!(cloned.to_string().contains("gone"));
    }
}
