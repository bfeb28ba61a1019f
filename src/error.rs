//! Crate-level error type
//!
//! Module errors convert into [`ChatError`] so the pipeline can use `?`
//! throughout. The variant decides how a failure surfaces to the caller:
//! a status code before streaming starts, or a terminal error frame after.

use crate::context::prompt::PromptError;
use crate::context::summarizer::SummarizerError;
use crate::context::token_budget::BudgetError;
use crate::generation::OracleError;
use crate::retrieval::RetrievalError;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors produced while serving a chat request
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Unsupported model: no codec registered for '{model}'")]
    UnsupportedModel { model: String },

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Generation stream failed: {0}")]
    GenerationStream(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::UnsupportedModel { .. } => "UNSUPPORTED_MODEL",
            ChatError::RetrievalUnavailable(_) => "RETRIEVAL_UNAVAILABLE",
            ChatError::Summarization(_) => "SUMMARIZATION_FAILED",
            ChatError::GenerationStream(_) => "GENERATION_FAILED",
            ChatError::InvalidRequest(_) => "VALIDATION_ERROR",
            ChatError::Configuration(_) => "CONFIGURATION_ERROR",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<RetrievalError> for ChatError {
    fn from(err: RetrievalError) -> Self {
        ChatError::RetrievalUnavailable(err.to_string())
    }
}

impl From<SummarizerError> for ChatError {
    fn from(err: SummarizerError) -> Self {
        ChatError::Summarization(err.to_string())
    }
}

impl From<OracleError> for ChatError {
    fn from(err: OracleError) -> Self {
        ChatError::GenerationStream(err.to_string())
    }
}

impl From<BudgetError> for ChatError {
    fn from(err: BudgetError) -> Self {
        ChatError::Configuration(err.to_string())
    }
}

impl From<PromptError> for ChatError {
    fn from(err: PromptError) -> Self {
        ChatError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for ChatError {
    fn from(err: config::ConfigError) -> Self {
        ChatError::Configuration(err.to_string())
    }
}
