//! Chat request pipeline
//!
//! One request runs as a straight sequence: acquire the tokenizer, embed the
//! question, look up matches, deduplicate them per source, summarize when the
//! context is too large, render the prompt, admit history under the token
//! budget, then stream the answer through the relay.
//!
//! Everything up to [`ChatPipeline::prepare`] happens before the response is
//! opened, so its failures are reported to the caller as a status code.

use super::ChatQuery;
use crate::config::Config;
use crate::context::{
    dedup, BudgetAllocator, ConditionalSummarizer, Message, OracleSummarizer, PromptComposer,
    Summarizer, TokenBudgetConfig, TokenizerRegistry,
};
use crate::error::{ChatError, Result};
use crate::generation::{CompletionOracle, CompletionRequest, GenerationStream, OpenAiClient};
use crate::metrics::METRICS;
use crate::relay::{RelayOutcome, ResponseSink, StreamRelay};
use crate::retrieval::{CachedEmbedder, Embedder, HttpEmbedder, IndexHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Everything needed to start generation, plus what went into it
#[derive(Debug, Clone)]
pub struct PreparedChat {
    pub request: CompletionRequest,
    /// Distinct sources backing the context, in retrieval order
    pub source_ids: Vec<String>,
    pub summarized: bool,
    /// Tokens of the rendered prompt before history was added
    pub prompt_tokens: usize,
    pub admitted_turns: usize,
    pub dropped_turns: usize,
}

/// Retrieval-augmented chat pipeline
pub struct ChatPipeline {
    tokenizers: TokenizerRegistry,
    embedder: Arc<dyn Embedder>,
    index: Arc<IndexHandle>,
    top_k: usize,
    summarizer: ConditionalSummarizer,
    allocator: BudgetAllocator,
    composer: PromptComposer,
    oracle: Arc<dyn CompletionOracle>,
}

impl ChatPipeline {
    /// Pipeline summarizing through `oracle` with default summarizer settings
    pub fn new(
        tokenizers: TokenizerRegistry,
        embedder: Arc<dyn Embedder>,
        index: Arc<IndexHandle>,
        oracle: Arc<dyn CompletionOracle>,
        composer: PromptComposer,
        budget: TokenBudgetConfig,
    ) -> Result<Self> {
        let threshold = budget.summarize_threshold;
        let allocator = BudgetAllocator::new(budget)?;
        let summarizer = Arc::new(OracleSummarizer::new(oracle.clone(), Default::default()));

        Ok(Self {
            tokenizers,
            embedder,
            index,
            top_k: 3,
            summarizer: ConditionalSummarizer::new(summarizer, threshold),
            allocator,
            composer,
            oracle,
        })
    }

    /// Build the production pipeline from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let tokenizers = TokenizerRegistry::from_aliases(&config.tokenizer.aliases)?;

        let http_embedder = HttpEmbedder::new(config.embedding.clone())?;
        let embedder = CachedEmbedder::wrap(Arc::new(http_embedder), &config.embedding);

        let index = Arc::new(IndexHandle::qdrant(config.retrieval.clone()));

        let oracle: Arc<dyn CompletionOracle> =
            Arc::new(OpenAiClient::new(config.generation.clone())?);
        let summarizer = Arc::new(OracleSummarizer::new(
            oracle.clone(),
            config.summarizer.clone(),
        ));

        let composer = PromptComposer::from_config(&config.prompt)
            .map_err(|e| ChatError::Configuration(e.to_string()))?;

        let pipeline = Self::new(
            tokenizers,
            embedder,
            index,
            oracle,
            composer,
            config.context.clone(),
        )?
        .with_top_k(config.retrieval.top_k)?
        .with_summarizer(summarizer);

        Ok(pipeline)
    }

    pub fn with_top_k(mut self, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(ChatError::Configuration(
                "retrieval top_k must be greater than zero".to_string(),
            ));
        }
        self.top_k = top_k;
        Ok(self)
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = ConditionalSummarizer::new(summarizer, self.allocator.summarize_threshold());
        self
    }

    /// Shared vector index handle
    pub fn index(&self) -> &Arc<IndexHandle> {
        &self.index
    }

    /// Assemble the completion request for `query`
    pub async fn prepare(&self, query: &ChatQuery) -> Result<PreparedChat> {
        let result = self.assemble(query).await;
        if let Err(e) = &result {
            error!(
                request_id = %query.request_id,
                model = %query.model_id,
                turns = query.turns.len(),
                "Failed to prepare chat: {}",
                e
            );
        }
        result
    }

    async fn assemble(&self, query: &ChatQuery) -> Result<PreparedChat> {
        if query.question.trim().is_empty() {
            return Err(ChatError::InvalidRequest("prompt must not be empty".to_string()));
        }
        if query.token_limit == 0 {
            return Err(ChatError::InvalidRequest(
                "model token limit must be greater than zero".to_string(),
            ));
        }

        // Before any remote call: an unknown model must not cost a retrieval
        let tokenizer = self.tokenizers.acquire(&query.model_id)?;

        let start = Instant::now();
        let vector = self.embedder.embed(&query.question).await?;
        METRICS.observe_stage("embedding", start.elapsed());

        let matches = self.index.lookup(vector, self.top_k).await?;
        let deduped = dedup(&matches);
        debug!(
            "{} matches from {} distinct sources",
            matches.len(),
            deduped.len()
        );

        let start = Instant::now();
        let context = self
            .summarizer
            .maybe_summarize(&deduped.documents, &query.question, &tokenizer)
            .await?;
        METRICS.observe_stage("context", start.elapsed());

        let system_prompt = self.composer.system_prompt();
        let base_prompt =
            self.composer
                .render(&context.text, &query.question, &[], &deduped.source_ids)?;
        let system_tokens = tokenizer.count(system_prompt);
        let prompt_tokens = system_tokens + tokenizer.count(&base_prompt);

        // The history heading is only rendered once a turn is admitted
        let charged = if query.turns.is_empty() {
            prompt_tokens
        } else {
            prompt_tokens + self.composer.history_overhead(&tokenizer)
        };
        let selection = self.allocator.select(charged, &query.turns, query.token_limit, |turn| {
            tokenizer.count(&self.composer.render_turn(turn))
        });

        let mut admitted = selection.turns;
        let mut user_prompt = self.composer.render(
            &context.text,
            &query.question,
            &admitted,
            &deduped.source_ids,
        )?;

        // Counts of joined text can drift from the sum of their parts
        let ceiling = query
            .token_limit
            .saturating_sub(self.allocator.generation_reserve());
        while !admitted.is_empty() && system_tokens + tokenizer.count(&user_prompt) > ceiling {
            admitted.remove(0);
            user_prompt = self.composer.render(
                &context.text,
                &query.question,
                &admitted,
                &deduped.source_ids,
            )?;
        }

        info!(
            "Prepared prompt: {} tokens, {} of {} turns admitted, summarized={}",
            prompt_tokens,
            admitted.len(),
            query.turns.len(),
            context.summarized
        );

        Ok(PreparedChat {
            request: CompletionRequest {
                model: query.model_id.clone(),
                messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
                max_tokens: Some(self.allocator.generation_reserve()),
                temperature: query.temperature,
            },
            source_ids: deduped.source_ids,
            summarized: context.summarized,
            prompt_tokens,
            admitted_turns: admitted.len(),
            dropped_turns: query.turns.len() - admitted.len(),
        })
    }

    /// Start streaming the answer for a prepared request
    pub async fn generate(&self, prepared: &PreparedChat) -> Result<GenerationStream> {
        let start = Instant::now();
        let stream = self.oracle.stream(&prepared.request).await?;
        METRICS.observe_stage("generation_start", start.elapsed());
        Ok(stream)
    }

    /// Prepare, generate and relay the answer into `sink`
    pub async fn respond<S>(&self, query: &ChatQuery, sink: &mut S) -> Result<RelayOutcome>
    where
        S: ResponseSink + ?Sized,
    {
        let prepared = self.prepare(query).await?;
        let stream = self.generate(&prepared).await.map_err(|e| {
            error!(
                request_id = %query.request_id,
                model = %query.model_id,
                "Failed to start generation: {}",
                e
            );
            e
        })?;

        Ok(StreamRelay::new().run(stream, sink).await)
    }
}
