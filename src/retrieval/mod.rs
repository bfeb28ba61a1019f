//! Retrieval of context chunks from the vector index
//!
//! The query text is embedded through an [`Embedder`], then the vector is
//! looked up in a [`VectorIndex`] reached through a shared [`IndexHandle`].

pub mod embedding;
pub mod index;

pub use embedding::{CachedEmbedder, EmbeddingConfig, HttpEmbedder};
pub use index::{IndexHandle, PayloadFields, QdrantIndex, RetrievalConfig};

use crate::context::Match;
use async_trait::async_trait;

/// Turns text into an embedding vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;
}

/// Nearest-neighbour search over stored chunks
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `top_k` matches for `vector`, in any order
    async fn query(&self, vector: Vec<f32>, top_k: usize) -> Result<Vec<Match>, RetrievalError>;
}

/// Retrieval errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrievalError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Malformed result: {0}")]
    Malformed(String),

    #[error("Index initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid top_k: {0}")]
    InvalidTopK(usize),
}
