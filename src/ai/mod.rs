//! AI-assisted patching.
//!
//! Structural matches are collected into one labelled prompt, sent to a
//! chat completion service, and the labelled parts of the answer are spliced
//! back into the files they came from.
//!
//! ## Pieces
//!
//! - [`CompletionService`]: one system + user message in, one text out
//! - [`OpenAiCompletion`]: the OpenAI-compatible implementation
//! - [`PatchSession`]: prompt construction, answer parsing and file updates
//! - [`ai`]: the pipeline step feeding a session from `ast_grep` matches

mod openai;
mod patch;

pub use openai::OpenAiCompletion;
pub use patch::{ai, extract_code_block, parse_parts, CodeSample, PatchReport, PatchSession, PART_LABEL, SYSTEM_PROMPT};

use async_trait::async_trait;

use crate::core::WorkflowError;

/// A single chat completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

/// Trait for completion services.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Get the service name.
    fn name(&self) -> &str;

    /// Text of the first completion choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, AiError>;
}

/// AI error types.
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("{0} is not set")]
    MissingApiKey(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("No response from AI")]
    NoResponse,

    #[error("Completion has no fenced code block")]
    NoCodeBlock,
}

impl From<AiError> for WorkflowError {
    fn from(err: AiError) -> Self {
        Self::Ai(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ai_error_conversion() {
        let err: WorkflowError = AiError::MissingApiKey("OPENAI_API_KEY".to_string()).into();
        assert_eq!(err.to_string(), "AI error: OPENAI_API_KEY is not set");
    }
}
