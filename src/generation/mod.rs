//! Text generation oracle
//!
//! The oracle answers either in one blocking call (used for summarization)
//! or as an incremental [`GenerationStream`] consumed by the relay.

pub mod client;
pub mod models;
pub mod sse;
pub mod stream;

pub use client::{OpenAiClient, OracleConfig};
pub use models::CompletionRequest;
pub use stream::{GenerationStream, StreamEvent};

use async_trait::async_trait;

/// External completion service
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    /// Run a completion to the end and return its text
    async fn complete(&self, request: &CompletionRequest) -> Result<String, OracleError>;

    /// Start a streamed completion
    ///
    /// Errors returned here happen before any output exists; failures after
    /// that arrive as [`StreamEvent::Error`].
    async fn stream(&self, request: &CompletionRequest) -> Result<GenerationStream, OracleError>;
}

/// Generation oracle errors
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
