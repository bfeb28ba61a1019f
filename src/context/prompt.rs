//! Prompt rendering from named templates

use super::models::Message;
use super::token_estimator::TokenEstimator;
use handlebars::{Handlebars, RenderErrorReason};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Name of the template used for answering questions
pub const ANSWER_TEMPLATE: &str = "answer";

/// Heading placed above flattened history turns
pub const HISTORY_HEADING: &str = "Conversation so far:\n";

const HISTORY_TRAILER: &str = "\n";

/// Prompt errors
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    #[error("Template '{template}' references undefined variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    #[error("Template '{template}' is invalid: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Failed to render template '{template}': {reason}")]
    Render { template: String, reason: String },
}

/// Source of prompt templates
pub trait TemplateStore: Send + Sync {
    fn render(&self, name: &str, vars: &HashMap<&str, String>) -> Result<String, PromptError>;
}

/// Handlebars templates using `{{variable}}` placeholders
///
/// Rendering is strict, so a placeholder without a value is an error, and
/// values are inserted verbatim without HTML escaping.
pub struct HandlebarsTemplates {
    registry: Handlebars<'static>,
}

impl Default for HandlebarsTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlebarsTemplates {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }

    pub fn register(&mut self, name: &str, body: &str) -> Result<(), PromptError> {
        self.registry
            .register_template_string(name, body)
            .map_err(|e| PromptError::InvalidTemplate {
                template: name.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn with_template(mut self, name: &str, body: &str) -> Result<Self, PromptError> {
        self.register(name, body)?;
        Ok(self)
    }
}

impl TemplateStore for HandlebarsTemplates {
    fn render(&self, name: &str, vars: &HashMap<&str, String>) -> Result<String, PromptError> {
        if !self.registry.has_template(name) {
            return Err(PromptError::UnknownTemplate(name.to_string()));
        }

        self.registry
            .render(name, vars)
            .map_err(|e| match e.reason() {
                RenderErrorReason::MissingVariable(variable) => PromptError::MissingVariable {
                    template: name.to_string(),
                    variable: variable.clone().unwrap_or_default(),
                },
                _ => PromptError::Render {
                    template: name.to_string(),
                    reason: e.to_string(),
                },
            })
    }
}

/// Prompt text configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_answer_template")]
    pub answer_template: String,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant that answers questions using only the provided context. \
     Cite the sources you relied on."
        .to_string()
}

fn default_answer_template() -> String {
    "Use the following passages to answer the question. If the passages do not \
     contain the answer, say that you don't know.\n\n\
     Passages:\n{{context}}\n\n\
     Sources: {{sources}}\n\n\
     {{history}}\
     Question: {{question}}"
        .to_string()
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            answer_template: default_answer_template(),
        }
    }
}

/// Renders the final instruction text for the generation oracle
pub struct PromptComposer {
    store: Arc<dyn TemplateStore>,
    system_prompt: String,
}

impl PromptComposer {
    pub fn new(store: Arc<dyn TemplateStore>, system_prompt: impl Into<String>) -> Self {
        Self {
            store,
            system_prompt: system_prompt.into(),
        }
    }

    /// Composer backed by handlebars templates from configuration
    pub fn from_config(config: &PromptConfig) -> Result<Self, PromptError> {
        let store = HandlebarsTemplates::new().with_template(ANSWER_TEMPLATE, &config.answer_template)?;
        Ok(Self::new(Arc::new(store), config.system_prompt.clone()))
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn render(
        &self,
        context: &str,
        question: &str,
        turns: &[Message],
        source_ids: &[String],
    ) -> Result<String, PromptError> {
        let mut vars = HashMap::new();
        vars.insert("context", context.to_string());
        vars.insert("question", question.to_string());
        vars.insert("history", self.flatten_turns(turns));
        vars.insert("sources", source_ids.join(", "));
        self.store.render(ANSWER_TEMPLATE, &vars)
    }

    /// One history turn as it appears in the prompt
    pub fn render_turn(&self, turn: &Message) -> String {
        format!("{}: {}\n", turn.role.as_str(), turn.content)
    }

    /// Tokens added by the heading and blank line around non-empty history
    pub fn history_overhead(&self, estimator: &dyn TokenEstimator) -> usize {
        estimator.estimate(HISTORY_HEADING) + estimator.estimate(HISTORY_TRAILER)
    }

    fn flatten_turns(&self, turns: &[Message]) -> String {
        if turns.is_empty() {
            return String::new();
        }
        let mut out = String::from(HISTORY_HEADING);
        for turn in turns {
            out.push_str(&self.render_turn(turn));
        }
        out.push_str(HISTORY_TRAILER);
        out
    }
}
