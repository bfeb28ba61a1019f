//! Request pipeline tying retrieval, context assembly, generation and relay

pub mod pipeline;

pub use pipeline::{ChatPipeline, PreparedChat};

use crate::context::Message;
use tracing::Span;
use uuid::Uuid;

/// One chat request after validation at the API boundary
#[derive(Debug, Clone)]
pub struct ChatQuery {
    pub request_id: Uuid,
    pub model_id: String,
    /// Total token window of the model
    pub token_limit: usize,
    /// Prior turns, oldest first
    pub turns: Vec<Message>,
    pub question: String,
    pub temperature: Option<f32>,
}

impl ChatQuery {
    pub fn new(model_id: impl Into<String>, token_limit: usize, question: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            model_id: model_id.into(),
            token_limit,
            turns: Vec::new(),
            question: question.into(),
            temperature: None,
        }
    }

    pub fn with_turns(mut self, turns: Vec<Message>) -> Self {
        self.turns = turns;
        self
    }

    /// Span carrying the request context for every log line of this request
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "chat",
            request_id = %self.request_id,
            model = %self.model_id,
            turns = self.turns.len(),
        )
    }
}
