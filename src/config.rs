//! Process configuration
//!
//! Values come from an optional TOML file overlaid with `CONTEXT_CHAT__*`
//! environment variables, e.g. `CONTEXT_CHAT__SERVER__PORT=9000` or
//! `CONTEXT_CHAT__GENERATION__API_KEY=...`. Every field has a default, so an
//! empty environment yields a runnable local setup.

use crate::context::{PromptConfig, SummarizerConfig, TokenBudgetConfig};
use crate::error::{ChatError, Result};
use crate::generation::OracleConfig;
use crate::retrieval::{EmbeddingConfig, RetrievalConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CONTEXT_CHAT";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CONTEXT_CHAT_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: OracleConfig,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub context: TokenBudgetConfig,

    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    #[serde(default)]
    pub prompt: PromptConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Frames buffered between the relay and the response body
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_stream_buffer() -> usize {
    32
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Explicit model id to codec mapping, checked before the built-in table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from `CONTEXT_CHAT_CONFIG` (or `config.toml` if present) and the
    /// environment
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => {
                let builder = config::Config::builder()
                    .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));
                Self::build(builder)
            }
        }
    }

    /// Load from a specific file, still overlaid with the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(true));
        Self::build(builder)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.context.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(ChatError::Configuration(
                "retrieval.top_k must be greater than zero".to_string(),
            ));
        }
        if self.server.max_body_bytes == 0 {
            return Err(ChatError::Configuration(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.context.generation_reserve, 1000);
        assert_eq!(config.context.summarize_threshold, 14_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("context-chat-{}.toml", uuid::Uuid::new_v4()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9001

[retrieval]
collection = "essays"
top_k = 5

[context]
generation_reserve = 512

[tokenizer.aliases]
local-model = "cl100k_base"
"#
        )
        .unwrap();
        drop(file);

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.retrieval.collection, "essays");
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.context.generation_reserve, 512);
        assert_eq!(config.context.summarize_threshold, 14_000);
        assert_eq!(
            config.tokenizer.aliases.get("local-model").map(String::as_str),
            Some("cl100k_base")
        );
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(matches!(config.validate(), Err(ChatError::Configuration(_))));
    }
}
