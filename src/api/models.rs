//! Request and response bodies for the HTTP API

use crate::chat::ChatQuery;
use crate::context::Message;
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Target model of a chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    /// Total context window of the model in tokens
    #[serde(rename = "tokenLimit")]
    pub token_limit: usize,
}

/// POST /api/v1/chat body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: ModelSpec,
    /// Prior conversation, oldest first
    #[serde(default)]
    pub messages: Vec<Message>,
    pub prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<()> {
        if self.model.id.trim().is_empty() {
            return Err(ChatError::InvalidRequest("model.id must not be empty".to_string()));
        }
        if self.model.token_limit == 0 {
            return Err(ChatError::InvalidRequest(
                "model.tokenLimit must be greater than zero".to_string(),
            ));
        }
        if self.prompt.trim().is_empty() {
            return Err(ChatError::InvalidRequest("prompt must not be empty".to_string()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ChatError::InvalidRequest(format!(
                    "temperature must be between 0 and 2, got {}",
                    t
                )));
            }
        }
        Ok(())
    }

    /// Validate and convert into a pipeline query
    pub fn into_query(self) -> Result<ChatQuery> {
        self.validate()?;
        Ok(ChatQuery {
            request_id: Uuid::new_v4(),
            model_id: self.model.id,
            token_limit: self.model.token_limit,
            turns: self.messages,
            question: self.prompt,
            temperature: self.temperature,
        })
    }
}

/// Error body returned before a stream starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// GET /health body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
