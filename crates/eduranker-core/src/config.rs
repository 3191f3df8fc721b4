//! Eduranker Configuration Management
//!
//! Handles configuration from environment variables and TOML config files
//! with sensible defaults for development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Vector index configuration
    pub index: IndexConfig,

    /// Embedding gateway configuration
    pub embedding: EmbeddingConfig,

    /// Reranking configuration
    pub rerank: RerankConfig,

    /// Ingestion configuration
    pub ingest: IngestConfig,

    /// Feedback ledger configuration
    pub feedback: FeedbackConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("EDURANKER_INDEX_PATH") {
            config.index.path = PathBuf::from(path);
        }
        if let Ok(dim) = std::env::var("EDURANKER_DIMENSION") {
            config.index.dimension = dim.parse().map_err(|_| ConfigError::InvalidValue {
                key: "EDURANKER_DIMENSION".to_string(),
                value: dim,
            })?;
        }
        if let Ok(k) = std::env::var("EDURANKER_SEARCH_TOP_K") {
            config.index.search_top_k = k.parse().map_err(|_| ConfigError::InvalidValue {
                key: "EDURANKER_SEARCH_TOP_K".to_string(),
                value: k,
            })?;
        }

        if let Ok(url) = std::env::var("EMBEDDING_URL") {
            config.embedding.endpoint = url;
        }
        if let Ok(secs) = std::env::var("EMBEDDING_TIMEOUT_SECS") {
            config.embedding.timeout_secs = secs.parse().map_err(|_| ConfigError::InvalidValue {
                key: "EMBEDDING_TIMEOUT_SECS".to_string(),
                value: secs,
            })?;
        }

        if let Ok(url) = std::env::var("CROSS_ENCODER_URL") {
            config.rerank.endpoint = url;
        }
        if let Ok(alpha) = std::env::var("RERANK_ALPHA") {
            config.rerank.alpha = alpha.parse().map_err(|_| ConfigError::InvalidValue {
                key: "RERANK_ALPHA".to_string(),
                value: alpha,
            })?;
        }
        if let Ok(k) = std::env::var("RERANK_TOP_K") {
            config.rerank.final_top_k = k.parse().map_err(|_| ConfigError::InvalidValue {
                key: "RERANK_TOP_K".to_string(),
                value: k,
            })?;
        }

        if let Ok(sources) = std::env::var("INGEST_SOURCES") {
            config.ingest.sources = sources
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(max) = std::env::var("INGEST_MAX_PER_SOURCE") {
            config.ingest.max_per_source = max.parse().map_err(|_| ConfigError::InvalidValue {
                key: "INGEST_MAX_PER_SOURCE".to_string(),
                value: max,
            })?;
        }

        if let Ok(min) = std::env::var("FEEDBACK_MIN_TRAINING_PAIRS") {
            config.feedback.min_training_pairs =
                min.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "FEEDBACK_MIN_TRAINING_PAIRS".to_string(),
                    value: min,
                })?;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;

        // Only override if env values differ from defaults
        if env_config.index.path != IndexConfig::default().path {
            self.index.path = env_config.index.path;
        }
        if env_config.embedding.endpoint != EmbeddingConfig::default().endpoint {
            self.embedding.endpoint = env_config.embedding.endpoint;
        }
        if env_config.rerank.endpoint != RerankConfig::default().endpoint {
            self.rerank.endpoint = env_config.rerank.endpoint;
        }
        if env_config.logging.level != LoggingConfig::default().level {
            self.logging.level = env_config.logging.level;
        }

        Ok(self)
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Embedding dimension (must match the embedding model)
    pub dimension: usize,

    /// Path stem for the persisted snapshot artifacts
    pub path: PathBuf,

    /// Candidate count retrieved before reranking
    pub search_top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 384, // all-MiniLM-L6-v2
            path: PathBuf::from("data/index"),
            search_top_k: 50,
        }
    }
}

/// Embedding gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Inference server base URL
    pub endpoint: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum cached question embeddings
    pub cache_capacity: u64,

    /// Time-to-live for cached question embeddings, in seconds
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8081".to_string(),
            timeout_secs: 30,
            // 10k embeddings @ ~1.5KB each = ~15MB
            cache_capacity: 10_000,
            cache_ttl_secs: 3600,
        }
    }
}

/// Reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Cross-encoder inference server base URL
    pub endpoint: String,

    /// Dense-score weight in the fused final score
    pub alpha: f32,

    /// Character cap for the representative document text
    pub doc_text_max_chars: usize,

    /// Result count after reranking
    pub final_top_k: usize,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8082".to_string(),
            alpha: 0.3,
            // ~375 tokens at 4 chars/token, within cross-encoder input limits
            doc_text_max_chars: 1500,
            final_top_k: 10,
            timeout_secs: 30,
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Sources fetched when a request does not name any
    pub sources: Vec<String>,

    /// Languages requested from language-aware fetchers
    pub languages: Vec<String>,

    /// Maximum resources per source per request
    pub max_per_source: usize,

    /// Per-fetch timeout in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                "wikipedia".to_string(),
                "github".to_string(),
                "medium".to_string(),
            ],
            languages: vec!["fr".to_string(), "en".to_string()],
            max_per_source: 15,
            fetch_timeout_secs: 60,
        }
    }
}

/// Feedback ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Labeled pairs required before refinement may trigger
    pub min_training_pairs: usize,

    /// Window within which an identical question reuses its existing id
    pub query_dedup_window_hours: i64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_training_pairs: 10,
            query_dedup_window_hours: 24,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
