//! Token budget allocation for conversation history
//!
//! After the prompt is rendered, history turns are admitted newest first
//! while `consumed + turn + reserve <= limit` holds. The walk stops at the
//! first turn that does not fit, so the admitted turns are always a
//! contiguous suffix of the history. A turn costs whatever it adds to the
//! rendered prompt, which the caller supplies as `turn_cost`.

use super::models::{Budget, Message};
use crate::metrics::METRICS;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, warn};

/// Token budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    /// Headroom kept free for the generated answer
    #[serde(default = "default_generation_reserve")]
    pub generation_reserve: usize,
    /// Combined context size above which documents are summarized
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold: usize,
}

fn default_generation_reserve() -> usize {
    1000
}

fn default_summarize_threshold() -> usize {
    14_000
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            generation_reserve: default_generation_reserve(),
            summarize_threshold: default_summarize_threshold(),
        }
    }
}

impl TokenBudgetConfig {
    /// Validate that the budget configuration is consistent
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.generation_reserve == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "generation_reserve must be greater than zero".to_string(),
            ));
        }
        if self.summarize_threshold == 0 {
            return Err(BudgetError::ConfigurationInvalid(
                "summarize_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),
}

/// Outcome of one allocation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Admitted turns, oldest first
    pub turns: Vec<Message>,
    pub budget: Budget,
    /// Older turns left out
    pub dropped: usize,
}

impl Selection {
    /// True when the prompt and reserve alone already exceed the limit
    pub fn overflowed(&self) -> bool {
        !self.budget.is_within_limit()
    }
}

/// Select the longest newest-first run of turns that fits the budget
pub fn select_turns<F>(
    rendered_prompt_tokens: usize,
    turns: &[Message],
    model_token_limit: usize,
    generation_reserve: usize,
    turn_cost: F,
) -> Selection
where
    F: Fn(&Message) -> usize,
{
    let mut budget = Budget::new(model_token_limit, generation_reserve);
    budget.consume(rendered_prompt_tokens);

    let mut admitted = VecDeque::new();
    for turn in turns.iter().rev() {
        let turn_tokens = turn_cost(turn);
        if !budget.try_consume(turn_tokens) {
            break;
        }
        admitted.push_front(turn.clone());
    }

    let dropped = turns.len() - admitted.len();
    Selection {
        turns: admitted.into(),
        budget,
        dropped,
    }
}

/// Budget allocator bound to a configured generation reserve
#[derive(Debug, Clone)]
pub struct BudgetAllocator {
    config: TokenBudgetConfig,
}

impl BudgetAllocator {
    /// Create a new allocator
    pub fn new(config: TokenBudgetConfig) -> Result<Self, BudgetError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Admit history turns for a prompt of `rendered_prompt_tokens`
    pub fn select<F>(
        &self,
        rendered_prompt_tokens: usize,
        turns: &[Message],
        model_token_limit: usize,
        turn_cost: F,
    ) -> Selection
    where
        F: Fn(&Message) -> usize,
    {
        let selection = select_turns(
            rendered_prompt_tokens,
            turns,
            model_token_limit,
            self.config.generation_reserve,
            turn_cost,
        );

        if selection.overflowed() {
            warn!(
                "Prompt of {} tokens plus reserve {} exceeds model limit {}; no history admitted",
                rendered_prompt_tokens, self.config.generation_reserve, model_token_limit
            );
        }

        debug!(
            "Admitted {} of {} turns: consumed={}, remaining={}",
            selection.turns.len(),
            turns.len(),
            selection.budget.consumed,
            selection.budget.remaining()
        );

        METRICS.record_token_budget(
            selection.budget.consumed,
            selection.budget.remaining(),
            selection.overflowed(),
        );
        METRICS.record_admitted_turns(selection.turns.len());

        selection
    }

    pub fn generation_reserve(&self) -> usize {
        self.config.generation_reserve
    }

    pub fn summarize_threshold(&self) -> usize {
        self.config.summarize_threshold
    }

    /// Get the configuration
    pub fn config(&self) -> &TokenBudgetConfig {
        &self.config
    }
}
