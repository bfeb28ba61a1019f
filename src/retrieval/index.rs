//! Vector index access backed by Qdrant

use super::{RetrievalError, VectorIndex};
use crate::context::Match;
use crate::metrics::METRICS;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use qdrant_client::{
    client::QdrantClient,
    qdrant::{value::Kind, ScoredPoint, SearchPoints, Value},
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Payload keys holding chunk metadata
#[derive(Debug, Clone, Deserialize)]
pub struct PayloadFields {
    #[serde(default = "default_source_field")]
    pub source: String,
    #[serde(default = "default_text_field")]
    pub text: String,
    #[serde(default = "default_chunk_index_field")]
    pub chunk_index: String,
}

fn default_source_field() -> String {
    "source".to_string()
}

fn default_text_field() -> String {
    "text".to_string()
}

fn default_chunk_index_field() -> String {
    "chunk_index".to_string()
}

impl Default for PayloadFields {
    fn default() -> Self {
        Self {
            source: default_source_field(),
            text: default_text_field(),
            chunk_index: default_chunk_index_field(),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Matches requested per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub payload: PayloadFields,
}

fn default_url() -> String {
    "http://localhost:6334".to_string()
}

fn default_collection() -> String {
    "documents".to_string()
}

fn default_top_k() -> usize {
    3
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            api_key: None,
            collection: default_collection(),
            top_k: default_top_k(),
            payload: PayloadFields::default(),
        }
    }
}

/// Qdrant-backed vector index
pub struct QdrantIndex {
    client: QdrantClient,
    config: RetrievalConfig,
}

impl QdrantIndex {
    /// Connect and check that the configured collection exists
    pub async fn connect(config: RetrievalConfig) -> Result<Self, RetrievalError> {
        let mut builder = QdrantClient::from_url(&config.url);
        if let Some(api_key) = &config.api_key {
            builder = builder.with_api_key(api_key.expose_secret().to_string());
        }
        let client = builder
            .build()
            .map_err(|e| RetrievalError::Initialization(e.to_string()))?;

        let collections = client
            .list_collections()
            .await
            .map_err(|e| RetrievalError::Transport(format!("Failed to list collections: {}", e)))?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == config.collection);
        if !exists {
            return Err(RetrievalError::Initialization(format!(
                "Collection '{}' not found",
                config.collection
            )));
        }

        info!("Connected to vector index: collection={}", config.collection);
        Ok(Self { client, config })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn query(&self, vector: Vec<f32>, top_k: usize) -> Result<Vec<Match>, RetrievalError> {
        let response = self
            .client
            .search_points(&SearchPoints {
                collection_name: self.config.collection.clone(),
                vector,
                limit: top_k as u64,
                with_payload: Some(true.into()),
                ..Default::default()
            })
            .await
            .map_err(|e| RetrievalError::Transport(format!("Search failed: {}", e)))?;

        response
            .result
            .iter()
            .map(|point| match_from_point(point, &self.config.payload))
            .collect()
    }
}

/// Validate a scored point into a [`Match`]
///
/// Distance is `1 - score`, matching cosine collections.
pub fn match_from_point(point: &ScoredPoint, fields: &PayloadFields) -> Result<Match, RetrievalError> {
    let source_id = string_field(&point.payload, &fields.source)?;
    let chunk_text = string_field(&point.payload, &fields.text)?;
    let chunk_index = integer_field(&point.payload, &fields.chunk_index)?;

    Ok(Match {
        source_id,
        chunk_text,
        chunk_index,
        embedding_distance: 1.0 - point.score,
    })
}

fn string_field(payload: &HashMap<String, Value>, key: &str) -> Result<String, RetrievalError> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Ok(s.clone()),
        Some(_) => Err(RetrievalError::Malformed(format!("Field '{}' is not a string", key))),
        None => Err(RetrievalError::Malformed(format!("Missing field '{}'", key))),
    }
}

fn integer_field(payload: &HashMap<String, Value>, key: &str) -> Result<u32, RetrievalError> {
    let raw = match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => *i,
        Some(Kind::DoubleValue(d)) if d.fract() == 0.0 => *d as i64,
        Some(_) => {
            return Err(RetrievalError::Malformed(format!(
                "Field '{}' is not an integer",
                key
            )))
        }
        None => return Err(RetrievalError::Malformed(format!("Missing field '{}'", key))),
    };
    u32::try_from(raw)
        .map_err(|_| RetrievalError::Malformed(format!("Field '{}' out of range: {}", key, raw)))
}

type Connector =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn VectorIndex>, RetrievalError>> + Send + Sync>;

/// Process-wide handle to the vector index
///
/// The connector runs at most once successfully, even when many requests
/// arrive before the first connection completes. A failed attempt is not
/// remembered, so the next request tries again.
pub struct IndexHandle {
    cell: OnceCell<Arc<dyn VectorIndex>>,
    connect: Connector,
}

impl IndexHandle {
    pub fn new<F, Fut>(connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn VectorIndex>, RetrievalError>> + Send + 'static,
    {
        Self {
            cell: OnceCell::new(),
            connect: Box::new(move || connect().boxed()),
        }
    }

    /// Handle that lazily connects to Qdrant
    pub fn qdrant(config: RetrievalConfig) -> Self {
        Self::new(move || {
            let config = config.clone();
            async move {
                let index = QdrantIndex::connect(config).await?;
                Ok(Arc::new(index) as Arc<dyn VectorIndex>)
            }
        })
    }

    /// Handle around an already-connected index
    pub fn ready(index: Arc<dyn VectorIndex>) -> Self {
        Self::new(move || {
            let index = index.clone();
            async move { Ok(index) }
        })
    }

    pub async fn get(&self) -> Result<Arc<dyn VectorIndex>, RetrievalError> {
        self.cell
            .get_or_try_init(|| (self.connect)())
            .await
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Matches for `vector`, closest first, at most `top_k`
    pub async fn lookup(&self, vector: Vec<f32>, top_k: usize) -> Result<Vec<Match>, RetrievalError> {
        if top_k == 0 {
            return Err(RetrievalError::InvalidTopK(top_k));
        }

        let start = Instant::now();
        let index = self.get().await?;
        let result = index.query(vector, top_k).await;
        METRICS.observe_stage("retrieval", start.elapsed());

        let mut matches = result.map_err(|e| {
            warn!("Vector index lookup failed: {}", e);
            e
        })?;
        matches.sort_by(|a, b| a.embedding_distance.total_cmp(&b.embedding_distance));
        matches.truncate(top_k);

        debug!("Retrieved {} matches (top_k={})", matches.len(), top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn string_value(s: &str) -> Value {
        Value {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    fn int_value(i: i64) -> Value {
        Value {
            kind: Some(Kind::IntegerValue(i)),
        }
    }

    fn point(payload: Vec<(&str, Value)>, score: f32) -> ScoredPoint {
        ScoredPoint {
            payload: payload
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            score,
            ..Default::default()
        }
    }

    struct FixedIndex(Vec<Match>);

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn query(&self, _vector: Vec<f32>, _top_k: usize) -> Result<Vec<Match>, RetrievalError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_match_from_point() {
        let p = point(
            vec![
                ("source", string_value("essay-1")),
                ("text", string_value("chunk body")),
                ("chunk_index", int_value(4)),
            ],
            0.75,
        );
        let m = match_from_point(&p, &PayloadFields::default()).unwrap();
        assert_eq!(m.source_id, "essay-1");
        assert_eq!(m.chunk_text, "chunk body");
        assert_eq!(m.chunk_index, 4);
        assert!((m.embedding_distance - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let p = point(vec![("source", string_value("essay-1"))], 0.5);
        let err = match_from_point(&p, &PayloadFields::default()).unwrap_err();
        assert!(matches!(err, RetrievalError::Malformed(msg) if msg.contains("text")));
    }

    #[test]
    fn test_mistyped_field_is_malformed() {
        let p = point(
            vec![
                ("source", int_value(1)),
                ("text", string_value("t")),
                ("chunk_index", int_value(0)),
            ],
            0.5,
        );
        assert!(match_from_point(&p, &PayloadFields::default()).is_err());

        let p = point(
            vec![
                ("source", string_value("s")),
                ("text", string_value("t")),
                ("chunk_index", int_value(-1)),
            ],
            0.5,
        );
        assert!(match_from_point(&p, &PayloadFields::default()).is_err());
    }

    #[tokio::test]
    async fn test_lookup_orders_by_distance() {
        let handle = IndexHandle::ready(Arc::new(FixedIndex(vec![
            Match::new("b", "far", 0, 0.9),
            Match::new("a", "near", 0, 0.1),
            Match::new("c", "mid", 0, 0.5),
        ])));

        let matches = handle.lookup(vec![0.0; 4], 2).await.unwrap();
        let ids: Vec<&str> = matches.iter().map(|m| m.source_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_lookup_rejects_zero_top_k() {
        let handle = IndexHandle::ready(Arc::new(FixedIndex(vec![])));
        assert!(matches!(
            handle.lookup(vec![], 0).await,
            Err(RetrievalError::InvalidTopK(0))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_handle_initializes_once_under_concurrency() {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let handle = Arc::new(IndexHandle::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Arc::new(FixedIndex(vec![])) as Arc<dyn VectorIndex>)
            }
        }));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.get().await.is_ok() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert!(handle.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let handle = IndexHandle::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(RetrievalError::Transport("connection refused".to_string()))
                } else {
                    Ok(Arc::new(FixedIndex(vec![])) as Arc<dyn VectorIndex>)
                }
            }
        });

        assert!(handle.get().await.is_err());
        assert!(!handle.is_initialized());
        assert!(handle.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[ignore = "requires a running Qdrant instance"]
    async fn test_qdrant_connect() {
        let handle = IndexHandle::qdrant(RetrievalConfig::default());
        assert!(handle.get().await.is_ok());
    }
}
