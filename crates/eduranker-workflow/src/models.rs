//! Request, response, and stage-outcome models for the workflow pipeline

use serde::{Deserialize, Serialize};

// ============================================================================
// Stages
// ============================================================================

/// The six ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    CaptureQuery,
    Ingest,
    RefreshIndex,
    Retrieve,
    Rerank,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CaptureQuery => write!(f, "capture_query"),
            Self::Ingest => write!(f, "ingest"),
            Self::RefreshIndex => write!(f, "refresh_index"),
            Self::Retrieve => write!(f, "retrieve"),
            Self::Rerank => write!(f, "rerank"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// Tagged result of one pipeline stage.
///
/// Every stage produces one of these instead of raising: `Degraded` carries
/// best-effort data plus the reason, `Failed` means the stage's fallback
/// value is substituted downstream. The orchestrator folds the reasons into
/// the response's accumulated error list.
#[derive(Debug)]
pub enum StageOutcome<T> {
    Ok(T),
    Degraded(T, String),
    Failed(String),
}

/// Per-stage entry in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub duration_ms: u64,

    /// Items the stage produced (queries saved, resources ingested,
    /// candidates retrieved, ...)
    pub count: usize,

    pub error: Option<String>,
}

// ============================================================================
// Request / Response
// ============================================================================

/// Parameters for one end-to-end pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    /// The user's question
    pub question: String,

    /// Sources to ingest from; empty means the configured defaults
    #[serde(default)]
    pub sources: Vec<String>,

    /// Languages for language-aware fetchers; empty means the configured
    /// defaults
    #[serde(default)]
    pub languages: Vec<String>,

    /// Maximum resources per source; None means the configured default
    #[serde(default)]
    pub max_per_source: Option<usize>,

    /// Dense candidates retrieved before reranking; None means the
    /// configured default
    #[serde(default)]
    pub retrieve_top_k: Option<usize>,

    /// Final result count; None means the configured default
    #[serde(default)]
    pub final_top_k: Option<usize>,

    /// Session tag carried onto the persisted inferences
    #[serde(default)]
    pub session_id: Option<String>,
}

impl WorkflowRequest {
    /// A request with every knob left at its configured default
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            sources: Vec::new(),
            languages: Vec::new(),
            max_per_source: None,
            retrieve_top_k: None,
            final_top_k: None,
            session_id: None,
        }
    }
}

/// One recommended resource in the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedResource {
    /// Ledger id for submitting feedback; None when persistence failed for
    /// this record
    pub inference_id: Option<String>,

    pub resource_id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    pub author: Option<String>,
    pub keywords: Vec<String>,

    pub dense_score: f32,
    pub rerank_score: Option<f32>,
    pub final_score: f32,
    pub rank: u32,
}

/// The pipeline's response: always success-shaped, with partial degradation
/// reported through `errors` and the per-stage reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub question: String,

    /// Persisted query id; None when query capture failed
    pub query_id: Option<String>,

    /// True when an identical recent question was reused
    pub query_dedup_hit: bool,

    /// Resources newly ingested this run
    pub ingested: usize,

    /// Dense candidates retrieved
    pub retrieved: usize,

    /// Final results returned
    pub returned: usize,

    /// False when the dense ranking passed through unscored
    pub rerank_applied: bool,

    pub results: Vec<RecommendedResource>,

    /// One report per stage, in pipeline order
    pub stages: Vec<StageReport>,

    pub total_duration_ms: u64,

    /// Accumulated per-stage errors; empty when no stage failed
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::RefreshIndex).unwrap();
        assert_eq!(json, "\"refresh_index\"");
        assert_eq!(Stage::CaptureQuery.to_string(), "capture_query");
    }

    #[test]
    fn test_request_defaults_from_json() {
        let request: WorkflowRequest =
            serde_json::from_str(r#"{"question": "what is rust"}"#).unwrap();
        assert!(request.sources.is_empty());
        assert!(request.final_top_k.is_none());
        assert!(request.session_id.is_none());
    }
}
