//! Token-budgeted context assembly
//!
//! Retrieved chunks are deduplicated per source, summarized when the combined
//! text crosses a size threshold, rendered into a prompt, and topped up with
//! as many recent conversation turns as the model's token budget allows.

pub mod dedup;
pub mod models;
pub mod prompt;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;

pub use dedup::{dedup, Deduplicated};
pub use models::{Budget, ContextDocument, Match, Message, Role, Token};
pub use prompt::{HandlebarsTemplates, PromptComposer, PromptConfig, PromptError, TemplateStore};
pub use summarizer::{
    AssembledContext, ConditionalSummarizer, OracleSummarizer, Summarizer, SummarizerConfig,
    SummarizerError,
};
pub use token_budget::{select_turns, BudgetAllocator, BudgetError, Selection, TokenBudgetConfig};
pub use token_estimator::{Codec, TokenEstimator, Tokenizer, TokenizerRegistry, WordBasedEstimator};
