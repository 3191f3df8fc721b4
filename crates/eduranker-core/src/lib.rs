//! Eduranker Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the eduranker
//! system:
//! - Resource, query, and inference models
//! - Feedback types and aggregate statistics
//! - Common error taxonomy
//! - Gateway traits for the embedding and cross-encoder models
//! - Persistence traits and in-memory reference stores
//! - Configuration management

pub mod config;
pub mod language;
pub mod store;

pub use config::{
    AppConfig, ConfigError, EmbeddingConfig, FeedbackConfig, IndexConfig, IngestConfig,
    LoggingConfig, RerankConfig,
};
pub use language::detect_language;
pub use store::{
    DocumentStore, InferenceStore, MemoryDocumentStore, MemoryInferenceStore, MemoryQueryStore,
    QueryStore, SavedQuery,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for eduranker operations
///
/// `Upstream` failures are degraded-mode conditions: callers log them and
/// continue with a fallback. `InvariantViolation` aborts the operation that
/// detected it. "No data" conditions (empty index, zero candidates) are
/// never errors.
#[derive(Error, Debug)]
pub enum EdurankerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EdurankerError>;

// ============================================================================
// Resource Model
// ============================================================================

/// An educational resource collected from an external source.
///
/// Immutable after creation except for embedding backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Store-assigned identifier
    pub id: String,

    /// Resource title
    pub title: String,

    /// Canonical URL
    pub url: String,

    /// Source tag (e.g. "wikipedia", "github", "medium")
    pub source: String,

    /// Language tag, if known
    pub language: Option<String>,

    /// Author, if known
    pub author: Option<String>,

    /// Body text
    pub text: Option<String>,

    /// Popularity score from the source (stars, views, ...)
    pub popularity: Option<i64>,

    /// Associated keywords
    pub keywords: Vec<String>,

    /// Precomputed embedding (fixed dimension, see `IndexConfig`)
    pub embedding: Option<Vec<f32>>,

    /// Collection timestamp
    pub collected_at: DateTime<Utc>,
}

impl Resource {
    /// Create a new resource
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            url: url.into(),
            source: source.into(),
            language: None,
            author: None,
            text: None,
            popularity: None,
            keywords: Vec::new(),
            embedding: None,
            collected_at: Utc::now(),
        }
    }

    /// Set body text
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set language tag
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set embedding vector
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set keywords
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }
}

// ============================================================================
// User Query Model
// ============================================================================

/// A captured user question.
///
/// Created once per question; immutable thereafter. Identical text submitted
/// again within the dedup window reuses the existing identifier (see
/// `QueryStore::save_query`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuery {
    /// Store-assigned identifier
    pub id: String,

    /// Raw question text
    pub question: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Question embedding, if it could be generated
    pub embedding: Option<Vec<f32>>,

    /// Detected language tag
    pub language: Option<String>,
}

impl UserQuery {
    /// Create a new query record
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            created_at: Utc::now(),
            embedding: None,
            language: None,
        }
    }
}

// ============================================================================
// Inference and Feedback
// ============================================================================

/// User feedback on a recommendation.
///
/// `Like` and `Dislike` are labeled training signal; `Click` and `View` are
/// engagement signal only and never count toward refinement eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Like,
    Dislike,
    Click,
    View,
}

impl FeedbackKind {
    /// Training label for this feedback, if it is a training signal
    pub fn label(&self) -> Option<f32> {
        match self {
            Self::Like => Some(1.0),
            Self::Dislike => Some(0.0),
            Self::Click | Self::View => None,
        }
    }

    /// Whether this feedback counts toward refinement eligibility
    pub fn is_training_signal(&self) -> bool {
        self.label().is_some()
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Like => write!(f, "like"),
            Self::Dislike => write!(f, "dislike"),
            Self::Click => write!(f, "click"),
            Self::View => write!(f, "view"),
        }
    }
}

impl std::str::FromStr for FeedbackKind {
    type Err = EdurankerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "like" => Ok(Self::Like),
            "dislike" => Ok(Self::Dislike),
            "click" => Ok(Self::Click),
            "view" => Ok(Self::View),
            other => Err(EdurankerError::Validation(format!(
                "unknown feedback kind: {other}"
            ))),
        }
    }
}

/// One persisted recommendation: a (query, resource) pair with its scores
/// and rank position.
///
/// `feedback` is the only mutable field; everything else is written once at
/// the end of a retrieval+rerank cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inference {
    /// Store-assigned identifier
    pub id: String,

    /// Owning query id
    pub query_id: String,

    /// Recommended resource id
    pub resource_id: String,

    /// Cosine similarity from the vector index
    pub dense_score: f32,

    /// Cross-encoder relevance score (None when reranking was not applied)
    pub rerank_score: Option<f32>,

    /// Fused final score
    pub final_score: f32,

    /// 1-based rank position, contiguous per query
    pub rank: u32,

    /// User feedback, set at most via `FeedbackLedger::record_feedback`
    pub feedback: Option<FeedbackKind>,

    /// Feedback timestamp, refreshed on every feedback write
    pub feedback_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Session tag
    pub session_id: Option<String>,
}

impl Inference {
    /// Create a new inference record
    pub fn new(
        query_id: impl Into<String>,
        resource_id: impl Into<String>,
        dense_score: f32,
        rerank_score: Option<f32>,
        final_score: f32,
        rank: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query_id: query_id.into(),
            resource_id: resource_id.into(),
            dense_score,
            rerank_score,
            final_score,
            rank,
            feedback: None,
            feedback_at: None,
            created_at: Utc::now(),
            session_id: None,
        }
    }

    /// Set session tag
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Aggregate feedback statistics used to gate model refinement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    /// Inferences carrying any feedback
    pub total_feedback: usize,

    pub likes: usize,
    pub dislikes: usize,
    pub clicks: usize,
    pub views: usize,

    /// Labeled pairs available for refinement (likes + dislikes)
    pub training_pairs: usize,
}

/// One labeled (query, document) pair exported to the refinement runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingPair {
    pub query_text: String,
    pub document_text: String,

    /// Relevance label: 1.0 for like, 0.0 for dislike
    pub label: f32,
}

// ============================================================================
// Gateway Traits
// ============================================================================

/// Gateway to the embedding model: text in, fixed-dimension vector out.
///
/// The model itself is an external collaborator; implementations wrap an
/// inference server or a test stub.
#[async_trait::async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Embed a single text. Returns `Ok(None)` for empty/invalid input.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// Embed a batch; the output is aligned with the input, `None` where an
    /// individual text could not be embedded.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>>;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

/// Gateway to the cross-encoder relevance model.
#[async_trait::async_trait]
pub trait CrossEncoderGateway: Send + Sync {
    /// Score one (query, document) pair. Unbounded scale; higher is more
    /// relevant.
    async fn score(&self, query: &str, document: &str) -> Result<f32>;

    /// Score one query against several documents; output aligned with input.
    async fn score_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;

    /// Degraded-mode flag: false when the model failed to load or the
    /// backing server is unreachable.
    fn is_available(&self) -> bool;
}

/// Source-specific resource fetcher (wiki, code forge, blog, ...).
///
/// Implementations are external collaborators; the orchestrator only fans
/// out across whatever fetchers were registered and records per-source
/// failures.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Source tag this fetcher serves (matches `Resource::source`)
    fn name(&self) -> &str;

    /// Fetch up to `max_results` resources for the question
    async fn fetch(
        &self,
        question: &str,
        max_results: usize,
        languages: &[String],
    ) -> Result<Vec<Resource>>;
}

/// External long-running model refinement collaborator.
///
/// The ledger gates the trigger; the training loop itself happens elsewhere.
#[async_trait::async_trait]
pub trait RefinementRunner: Send + Sync {
    async fn refine(&self, pairs: &[TrainingPair]) -> Result<RefinementReport>;
}

/// Outcome of one refinement run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementReport {
    pub trained_pairs: usize,
    pub model_version: String,
    pub completed_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
