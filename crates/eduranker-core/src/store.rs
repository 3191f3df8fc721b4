//! Persistence traits and in-memory reference stores
//!
//! The document, query, and inference stores are external collaborators;
//! the traits here are what the core consumes. The in-memory
//! implementations back the test suites and the demo binary, and define the
//! reference semantics (notably the query dedup window).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use crate::{EdurankerError, FeedbackKind, Inference, Resource, Result, UserQuery};

// ============================================================================
// Traits
// ============================================================================

/// Persistent collection of educational resources.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All `(id, embedding)` pairs for resources carrying an embedding
    async fn find_with_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>>;

    /// Hydrate resources by id; unknown ids are silently absent
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Resource>>;

    /// Insert a resource, returning its id
    async fn insert(&self, resource: Resource) -> Result<String>;

    /// Look up an already-collected resource by (url, source)
    async fn find_existing(&self, url: &str, source: &str) -> Result<Option<Resource>>;

    /// Backfill the embedding of an existing resource. Returns false for an
    /// unknown id.
    async fn update_embedding(&self, id: &str, embedding: Vec<f32>) -> Result<bool>;

    /// Total resource count
    async fn count(&self) -> Result<usize>;
}

/// Result of persisting a user question
#[derive(Debug, Clone)]
pub struct SavedQuery {
    pub id: String,

    /// True when an identical question inside the dedup window was reused
    pub dedup_hit: bool,
}

/// Persistence for captured user questions.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Persist a question, reusing the existing record when identical text
    /// was saved within the dedup window.
    async fn save_query(
        &self,
        question: &str,
        embedding: Option<Vec<f32>>,
        language: Option<String>,
    ) -> Result<SavedQuery>;

    /// Fetch one query by id
    async fn find_by_id(&self, id: &str) -> Result<Option<UserQuery>>;
}

/// Persistence for inference records.
#[async_trait]
pub trait InferenceStore: Send + Sync {
    /// Append one inference record, returning its id
    async fn save_inference(&self, inference: Inference) -> Result<String>;

    /// Set the feedback field. Returns false for an unknown id.
    async fn update_feedback(&self, inference_id: &str, kind: FeedbackKind) -> Result<bool>;

    /// All inferences for a query, ordered by rank
    async fn find_by_query(&self, query_id: &str) -> Result<Vec<Inference>>;

    /// Every inference in the store
    async fn all(&self) -> Result<Vec<Inference>>;
}

// ============================================================================
// In-Memory Document Store
// ============================================================================

/// In-memory `DocumentStore`
#[derive(Default)]
pub struct MemoryDocumentStore {
    resources: RwLock<Vec<Resource>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_with_embeddings(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .filter_map(|r| r.embedding.as_ref().map(|e| (r.id.clone(), e.clone())))
            .collect())
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn insert(&self, resource: Resource) -> Result<String> {
        let id = resource.id.clone();
        self.resources.write().await.push(resource);
        Ok(id)
    }

    async fn find_existing(&self, url: &str, source: &str) -> Result<Option<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources
            .iter()
            .find(|r| r.url == url && r.source == source)
            .cloned())
    }

    async fn update_embedding(&self, id: &str, embedding: Vec<f32>) -> Result<bool> {
        let mut resources = self.resources.write().await;
        match resources.iter_mut().find(|r| r.id == id) {
            Some(resource) => {
                resource.embedding = Some(embedding);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.resources.read().await.len())
    }
}

// ============================================================================
// In-Memory Query Store
// ============================================================================

/// In-memory `QueryStore` with the same-text dedup window.
pub struct MemoryQueryStore {
    queries: RwLock<Vec<UserQuery>>,
    dedup_window: Duration,
}

impl MemoryQueryStore {
    /// Create with the default 24h dedup window
    pub fn new() -> Self {
        Self::with_window(Duration::hours(24))
    }

    /// Create with an explicit dedup window
    pub fn with_window(dedup_window: Duration) -> Self {
        Self {
            queries: RwLock::new(Vec::new()),
            dedup_window,
        }
    }
}

impl Default for MemoryQueryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryStore for MemoryQueryStore {
    async fn save_query(
        &self,
        question: &str,
        embedding: Option<Vec<f32>>,
        language: Option<String>,
    ) -> Result<SavedQuery> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EdurankerError::Validation(
                "question must not be empty".to_string(),
            ));
        }

        let cutoff = Utc::now() - self.dedup_window;
        let mut queries = self.queries.write().await;

        if let Some(existing) = queries
            .iter()
            .find(|q| q.question == question && q.created_at >= cutoff)
        {
            return Ok(SavedQuery {
                id: existing.id.clone(),
                dedup_hit: true,
            });
        }

        let mut query = UserQuery::new(question);
        query.embedding = embedding;
        query.language = language;
        let id = query.id.clone();
        queries.push(query);

        Ok(SavedQuery {
            id,
            dedup_hit: false,
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<UserQuery>> {
        let queries = self.queries.read().await;
        Ok(queries.iter().find(|q| q.id == id).cloned())
    }
}

// ============================================================================
// In-Memory Inference Store
// ============================================================================

/// In-memory `InferenceStore`
#[derive(Default)]
pub struct MemoryInferenceStore {
    inferences: RwLock<Vec<Inference>>,
}

impl MemoryInferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InferenceStore for MemoryInferenceStore {
    async fn save_inference(&self, inference: Inference) -> Result<String> {
        let id = inference.id.clone();
        self.inferences.write().await.push(inference);
        Ok(id)
    }

    async fn update_feedback(&self, inference_id: &str, kind: FeedbackKind) -> Result<bool> {
        let mut inferences = self.inferences.write().await;
        match inferences.iter_mut().find(|i| i.id == inference_id) {
            Some(inference) => {
                inference.feedback = Some(kind);
                inference.feedback_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_query(&self, query_id: &str) -> Result<Vec<Inference>> {
        let inferences = self.inferences.read().await;
        let mut matched: Vec<Inference> = inferences
            .iter()
            .filter(|i| i.query_id == query_id)
            .cloned()
            .collect();
        matched.sort_by_key(|i| i.rank);
        Ok(matched)
    }

    async fn all(&self) -> Result<Vec<Inference>> {
        Ok(self.inferences.read().await.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
