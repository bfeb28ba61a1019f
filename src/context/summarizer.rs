//! Threshold-triggered summarization of retrieved context

use super::models::{ContextDocument, Message};
use super::token_estimator::TokenEstimator;
use crate::generation::{CompletionOracle, CompletionRequest, OracleError};
use crate::metrics::METRICS;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Separator placed between documents in the combined context
pub const DOCUMENT_SEPARATOR: &str = "\n\n";

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Condense `text`, keeping what matters for `focus_question`
    async fn summarize(&self, text: &str, focus_question: &str) -> Result<String, SummarizerError>;
}

/// Configuration for the oracle-backed summarizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_tokens() -> usize {
    2000
}

fn default_temperature() -> f32 {
    0.3
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Summarizer that delegates to the completion oracle
pub struct OracleSummarizer {
    oracle: Arc<dyn CompletionOracle>,
    config: SummarizerConfig,
}

impl OracleSummarizer {
    pub fn new(oracle: Arc<dyn CompletionOracle>, config: SummarizerConfig) -> Self {
        Self { oracle, config }
    }

    /// Build summarization prompt
    fn build_prompt(&self, text: &str, focus_question: &str) -> String {
        format!(
            "Summarize the following documents. Keep every fact that helps answer \
            the question \"{}\" and drop the rest. Keep the summary under {} tokens.\n\n{}",
            focus_question, self.config.max_tokens, text
        )
    }
}

#[async_trait]
impl Summarizer for OracleSummarizer {
    async fn summarize(&self, text: &str, focus_question: &str) -> Result<String, SummarizerError> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message::system(
                    "You are a concise summarizer. Extract key information and compress it efficiently.",
                ),
                Message::user(self.build_prompt(text, focus_question)),
            ],
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        let summary = self.oracle.complete(&request).await?;
        if summary.trim().is_empty() {
            return Err(SummarizerError::EmptyResponse);
        }

        debug!("Summarization successful");
        Ok(summary)
    }
}

/// Combined context handed to the prompt composer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    /// Whether `text` came from the summarization oracle
    pub summarized: bool,
    /// Token count of the documents before any summarization
    pub source_tokens: usize,
}

/// Summarizes documents only when they exceed a size threshold
///
/// The summary is returned as-is; it is not re-measured, so it can still
/// overflow the model's window once the prompt is rendered around it.
pub struct ConditionalSummarizer {
    summarizer: Arc<dyn Summarizer>,
    threshold: usize,
}

impl ConditionalSummarizer {
    pub fn new(summarizer: Arc<dyn Summarizer>, threshold: usize) -> Self {
        Self {
            summarizer,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub async fn maybe_summarize(
        &self,
        documents: &[ContextDocument],
        focus_question: &str,
        estimator: &dyn TokenEstimator,
    ) -> Result<AssembledContext, SummarizerError> {
        let source_tokens: usize = documents
            .iter()
            .map(|d| estimator.estimate(&d.full_text))
            .sum();
        let combined = documents
            .iter()
            .map(|d| d.full_text.as_str())
            .collect::<Vec<_>>()
            .join(DOCUMENT_SEPARATOR);

        if source_tokens <= self.threshold {
            debug!(
                "Context of {} tokens within threshold {}, using verbatim",
                source_tokens, self.threshold
            );
            return Ok(AssembledContext {
                text: combined,
                summarized: false,
                source_tokens,
            });
        }

        info!(
            "Context of {} tokens exceeds threshold {}, summarizing {} documents",
            source_tokens,
            self.threshold,
            documents.len()
        );
        METRICS.record_summarization();

        let text = self
            .summarizer
            .summarize(&combined, focus_question)
            .await
            .map_err(|e| {
                warn!("Summarization failed: {}", e);
                e
            })?;

        Ok(AssembledContext {
            text,
            summarized: true,
            source_tokens,
        })
    }
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Summary was empty")]
    EmptyResponse,
}
