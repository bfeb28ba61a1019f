//! Test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use context_chat::chat::ChatPipeline;
use context_chat::context::{Match, PromptComposer, PromptConfig, TokenBudgetConfig, TokenizerRegistry};
use context_chat::generation::{
    CompletionOracle, CompletionRequest, GenerationStream, OracleError, StreamEvent,
};
use context_chat::retrieval::{Embedder, IndexHandle, RetrievalError, VectorIndex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct StubEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.1, 0.2, 0.3])
    }
}

pub struct StubIndex {
    pub matches: Result<Vec<Match>, RetrievalError>,
    pub delay: Option<Duration>,
    pub queries: AtomicUsize,
}

impl StubIndex {
    pub fn with_matches(matches: Vec<Match>) -> Self {
        Self {
            matches: Ok(matches),
            delay: None,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            matches: Err(RetrievalError::Transport("connection refused".to_string())),
            delay: None,
            queries: AtomicUsize::new(0),
        }
    }

    /// Answer only after `delay`
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl VectorIndex for StubIndex {
    async fn query(&self, _vector: Vec<f32>, _top_k: usize) -> Result<Vec<Match>, RetrievalError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.matches.clone()
    }
}

/// Oracle that replays fixed stream events and records requests
pub struct ScriptedOracle {
    pub events: Vec<StreamEvent>,
    pub summary: String,
    pub reject_stream: bool,
    pub completions: AtomicUsize,
    pub streamed: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedOracle {
    pub fn answering(words: &[&str]) -> Self {
        let mut events: Vec<StreamEvent> = words
            .iter()
            .map(|w| StreamEvent::Token(w.to_string()))
            .collect();
        events.push(StreamEvent::Done);
        Self {
            events,
            summary: "SUMMARY OF DOCUMENTS".to_string(),
            reject_stream: false,
            completions: AtomicUsize::new(0),
            streamed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            ..Self::answering(&[])
        }
    }

    pub fn rejecting() -> Self {
        Self {
            reject_stream: true,
            ..Self::answering(&[])
        }
    }
}

#[async_trait]
impl CompletionOracle for ScriptedOracle {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, OracleError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(self.summary.clone())
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<GenerationStream, OracleError> {
        self.streamed.lock().unwrap().push(request.clone());
        if self.reject_stream {
            return Err(OracleError::UpstreamError("Status 401: bad key".to_string()));
        }
        Ok(GenerationStream::from_events(self.events.clone()))
    }
}

pub struct Fixture {
    pub embedder: Arc<StubEmbedder>,
    pub index: Arc<StubIndex>,
    pub oracle: Arc<ScriptedOracle>,
    pub pipeline: Arc<ChatPipeline>,
}

pub fn fixture(index: StubIndex, oracle: ScriptedOracle, budget: TokenBudgetConfig) -> Fixture {
    let embedder = Arc::new(StubEmbedder::default());
    let index = Arc::new(index);
    let oracle = Arc::new(oracle);

    let pipeline = ChatPipeline::new(
        TokenizerRegistry::new(),
        embedder.clone(),
        Arc::new(IndexHandle::ready(index.clone())),
        oracle.clone(),
        PromptComposer::from_config(&PromptConfig::default()).unwrap(),
        budget,
    )
    .unwrap();

    Fixture {
        embedder,
        index,
        oracle,
        pipeline: Arc::new(pipeline),
    }
}

pub fn essay_matches() -> Vec<Match> {
    vec![
        Match::new("essay-a", "Startups grow by doing things that don't scale.", 0, 0.12),
        Match::new("essay-b", "Default alive means revenue outpaces expenses.", 3, 0.20),
        Match::new("essay-a", "Recruit users manually at first.", 1, 0.31),
    ]
}
