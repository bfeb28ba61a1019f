//! Query embedding over an OpenAI-compatible `/v1/embeddings` endpoint

use super::{Embedder, RetrievalError};
use crate::metrics::METRICS;
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Embedding service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Cached query embeddings; 0 disables the cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_cache_capacity() -> u64 {
    1024
}

fn default_cache_ttl_secs() -> u64 {
    600
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            timeout_ms: default_timeout_ms(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP embedding client
pub struct HttpEmbedder {
    http: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self, RetrievalError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RetrievalError::Initialization(e.to_string()))?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let url = format!("{}/v1/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut req = self.http.post(&url).json(&EmbeddingRequest {
            model: &self.config.model,
            input: text,
        });

        if let Some(api_key) = &self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req
            .send()
            .await
            .map_err(|e| RetrievalError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RetrievalError::Upstream(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| RetrievalError::Malformed("Empty embedding response".to_string()))?;

        debug!("Embedded query: {} dimensions", embedding.len());
        Ok(embedding)
    }
}

/// Embedder with a bounded, time-limited cache keyed by query text
///
/// Concurrent misses for the same text share one upstream call.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    /// Wrap `inner` according to the config, or return it unchanged when
    /// caching is disabled
    pub fn wrap(inner: Arc<dyn Embedder>, config: &EmbeddingConfig) -> Arc<dyn Embedder> {
        if config.cache_capacity == 0 {
            return inner;
        }
        Arc::new(Self::new(
            inner,
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        ))
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let loaded = AtomicBool::new(false);
        let result = self
            .cache
            .try_get_with(text.to_string(), async {
                loaded.store(true, Ordering::Relaxed);
                self.inner.embed(text).await.map(Arc::new)
            })
            .await;
        METRICS.record_embedding_cache(!loaded.load(Ordering::Relaxed));

        result
            .map(|v| v.as_ref().clone())
            .map_err(|e| e.as_ref().clone())
    }
}
