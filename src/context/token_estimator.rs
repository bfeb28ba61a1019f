//! Token counting keyed by model id
//!
//! Budget correctness depends on counting with the same codec the
//! generation oracle uses, so an unknown model id is an error rather than
//! a reason to fall back to some default encoding.

use super::models::Token;
use crate::error::{ChatError, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer as Encoding};
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Token estimator trait for different tokenization strategies
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text
    fn estimate(&self, text: &str) -> usize;

    /// Estimate tokens for multiple texts
    fn estimate_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.estimate(t)).collect()
    }
}

/// BPE codecs shipped with tiktoken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Cl100kBase,
    P50kBase,
    P50kEdit,
    R50kBase,
}

impl Codec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Cl100kBase => "cl100k_base",
            Codec::P50kBase => "p50k_base",
            Codec::P50kEdit => "p50k_edit",
            Codec::R50kBase => "r50k_base",
        }
    }

    fn encoding(&self) -> Encoding {
        match self {
            Codec::Cl100kBase => Encoding::Cl100kBase,
            Codec::P50kBase => Encoding::P50kBase,
            Codec::P50kEdit => Encoding::P50kEdit,
            Codec::R50kBase => Encoding::R50kBase,
        }
    }
}

impl FromStr for Codec {
    type Err = ChatError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "cl100k_base" => Ok(Codec::Cl100kBase),
            "p50k_base" => Ok(Codec::P50kBase),
            "p50k_edit" => Ok(Codec::P50kEdit),
            "r50k_base" => Ok(Codec::R50kBase),
            other => Err(ChatError::Configuration(format!("Unknown codec: {}", other))),
        }
    }
}

/// Resolves model ids to codecs and hands out per-request tokenizers
///
/// BPE tables are loaded once per encoding and shared by every tokenizer
/// acquired from this registry or its clones.
#[derive(Clone, Default)]
pub struct TokenizerRegistry {
    aliases: HashMap<String, Codec>,
    loaded: Arc<Mutex<HashMap<Encoding, Arc<CoreBPE>>>>,
}

impl fmt::Debug for TokenizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenizerRegistry")
            .field("aliases", &self.aliases)
            .finish_non_exhaustive()
    }
}

impl TokenizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `model id -> codec name` table
    pub fn from_aliases(aliases: &HashMap<String, String>) -> Result<Self> {
        let aliases = aliases
            .iter()
            .map(|(model, codec)| Ok((model.clone(), codec.parse()?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self {
            aliases,
            ..Self::default()
        })
    }

    /// Register an explicit codec for a model id
    pub fn register(&mut self, model_id: impl Into<String>, codec: Codec) {
        self.aliases.insert(model_id.into(), codec);
    }

    /// Acquire a tokenizer for one request; it is released when dropped
    pub fn acquire(&self, model_id: &str) -> Result<Tokenizer> {
        let encoding = match self.aliases.get(model_id) {
            Some(codec) => codec.encoding(),
            None => get_tokenizer(model_id).ok_or_else(|| ChatError::UnsupportedModel {
                model: model_id.to_string(),
            })?,
        };

        let bpe = self.bpe(encoding)?;
        debug!("Acquired tokenizer for model {}", model_id);

        Ok(Tokenizer {
            model_id: model_id.to_string(),
            bpe,
        })
    }

    fn bpe(&self, encoding: Encoding) -> Result<Arc<CoreBPE>> {
        let mut loaded = self.loaded.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bpe) = loaded.get(&encoding) {
            return Ok(bpe.clone());
        }

        let bpe = tiktoken_rs::get_bpe_from_tokenizer(encoding)
            .map_err(|e| ChatError::Internal(format!("Failed to load {:?}: {}", encoding, e)))?;
        let bpe = Arc::new(bpe);
        loaded.insert(encoding, bpe.clone());
        debug!("Loaded BPE table {:?}", encoding);
        Ok(bpe)
    }
}

/// Model-specific text/token codec
pub struct Tokenizer {
    model_id: String,
    bpe: Arc<CoreBPE>,
}

impl Tokenizer {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    pub fn encode(&self, text: &str) -> Vec<Token> {
        self.bpe
            .encode_with_special_tokens(text)
            .into_iter()
            .map(|t| t as Token)
            .collect()
    }
}

impl TokenEstimator for Tokenizer {
    fn estimate(&self, text: &str) -> usize {
        self.count(text)
    }
}

/// Word-based token estimator (fallback, ~1.3 tokens per word)
pub struct WordBasedEstimator {
    tokens_per_word: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_tokenizer() {
        let registry = TokenizerRegistry::new();
        let tokenizer = registry.acquire("gpt-4").unwrap();
        let text = "Hello, world! This is a test.";
        let tokens = tokenizer.count(text);
        assert!(tokens > 0);
        assert!(tokens < 20); // Should be around 8-10 tokens
        assert_eq!(tokenizer.encode(text).len(), tokens);
        assert_eq!(tokenizer.model_id(), "gpt-4");
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let registry = TokenizerRegistry::new();
        let err = registry.acquire("definitely-not-a-model").err().unwrap();
        assert!(matches!(err, ChatError::UnsupportedModel { model } if model == "definitely-not-a-model"));
    }

    #[test]
    fn test_alias_registration() {
        let mut aliases = HashMap::new();
        aliases.insert("local-llama".to_string(), "cl100k_base".to_string());
        let registry = TokenizerRegistry::from_aliases(&aliases).unwrap();
        let aliased = registry.acquire("local-llama").unwrap();
        let native = registry.acquire("gpt-4").unwrap();
        let text = "Token counts must match across aliases.";
        assert_eq!(aliased.encode(text), native.encode(text));
    }

    #[test]
    fn test_bpe_table_shared_across_requests() {
        let registry = TokenizerRegistry::new();
        let first = registry.acquire("gpt-4").unwrap();
        let second = registry.clone().acquire("gpt-3.5-turbo").unwrap();
        assert!(Arc::ptr_eq(&first.bpe, &second.bpe));

        drop(first);
        let third = registry.acquire("gpt-4").unwrap();
        assert!(Arc::ptr_eq(&third.bpe, &second.bpe));
    }

    #[test]
    fn test_unknown_codec_alias() {
        let mut aliases = HashMap::new();
        aliases.insert("x".to_string(), "o999k".to_string());
        assert!(TokenizerRegistry::from_aliases(&aliases).is_err());
    }

    #[test]
    fn test_word_based_estimator() {
        let estimator = WordBasedEstimator::default();
        let text = "Hello world test";
        let tokens = estimator.estimate(text);
        assert_eq!(tokens, 4); // 3 words * 1.3 = 3.9 -> 4
    }

    #[test]
    fn test_batch_estimation() {
        let tokenizer = TokenizerRegistry::new().acquire("gpt-3.5-turbo").unwrap();
        let texts = vec!["Hello", "world", "test"];
        let tokens = tokenizer.estimate_batch(&texts);
        assert_eq!(tokens.len(), 3);
        assert!(tokens.iter().all(|&t| t > 0));
    }
}
