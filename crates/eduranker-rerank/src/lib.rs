//! Eduranker Rerank - Precision reranking over dense retrieval candidates
//!
//! Takes the vector index's candidates, scores each (question, document)
//! pair with the cross-encoder gateway, and fuses both signals into the
//! final ranking. When the cross-encoder is unavailable the dense ranking
//! passes through unchanged and the outcome is flagged as not applied.

use eduranker_core::{CrossEncoderGateway, RerankConfig, Resource, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod cross_encoder;

pub use cross_encoder::RestCrossEncoderGateway;

// ============================================================================
// Candidate Types
// ============================================================================

/// A dense retrieval candidate: hydrated resource plus its cosine score.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub resource: Resource,
    pub dense_score: f32,
}

/// A fully ranked result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub resource: Resource,

    /// Cosine similarity from the vector index
    pub dense_score: f32,

    /// Cross-encoder score; None when reranking was not applied
    pub rerank_score: Option<f32>,

    /// Fused final score
    pub final_score: f32,

    /// 1-based position after sorting and truncation
    pub rank: u32,
}

/// The reranking stage's output.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub results: Vec<RankedCandidate>,

    /// False when the dense ranking passed through unscored
    pub applied: bool,
}

// ============================================================================
// Reranker
// ============================================================================

/// Fuses dense similarity with cross-encoder relevance.
pub struct Reranker {
    scorer: Arc<dyn CrossEncoderGateway>,
    config: RerankConfig,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn CrossEncoderGateway>, config: RerankConfig) -> Self {
        Self { scorer, config }
    }

    /// Rerank dense candidates and return the top `top_k`.
    ///
    /// Sort is strictly by descending final score; the sort is stable, so
    /// ties keep their dense order and results stay deterministic. Ranks are
    /// assigned 1..N after truncation.
    pub async fn rerank(
        &self,
        question: &str,
        candidates: Vec<ScoredCandidate>,
        top_k: usize,
    ) -> Result<RerankOutcome> {
        if candidates.is_empty() {
            return Ok(RerankOutcome {
                results: Vec::new(),
                applied: false,
            });
        }

        if !self.scorer.is_available() {
            tracing::warn!("cross-encoder unavailable, passing dense ranking through");
            return Ok(self.dense_passthrough(candidates, top_k));
        }

        let documents: Vec<String> = candidates
            .iter()
            .map(|c| representative_text(&c.resource, self.config.doc_text_max_chars))
            .collect();

        let scores = match self.scorer.score_batch(question, &documents).await {
            Ok(scores) if scores.len() == documents.len() => scores,
            Ok(scores) => {
                tracing::warn!(
                    expected = documents.len(),
                    got = scores.len(),
                    "cross-encoder returned a partial batch, passing dense ranking through"
                );
                return Ok(self.dense_passthrough(candidates, top_k));
            }
            Err(e) => {
                tracing::warn!(error = %e, "cross-encoder scoring failed, passing dense ranking through");
                return Ok(self.dense_passthrough(candidates, top_k));
            }
        };

        let mut results: Vec<RankedCandidate> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, rerank_score)| {
                let final_score = fuse_scores(candidate.dense_score, rerank_score, self.config.alpha);
                RankedCandidate {
                    resource: candidate.resource,
                    dense_score: candidate.dense_score,
                    rerank_score: Some(rerank_score),
                    final_score,
                    rank: 0,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        assign_ranks(&mut results);

        tracing::debug!(returned = results.len(), "reranking complete");
        Ok(RerankOutcome {
            results,
            applied: true,
        })
    }

    fn dense_passthrough(
        &self,
        candidates: Vec<ScoredCandidate>,
        top_k: usize,
    ) -> RerankOutcome {
        let mut results: Vec<RankedCandidate> = candidates
            .into_iter()
            .take(top_k)
            .map(|candidate| RankedCandidate {
                final_score: candidate.dense_score,
                resource: candidate.resource,
                dense_score: candidate.dense_score,
                rerank_score: None,
                rank: 0,
            })
            .collect();
        assign_ranks(&mut results);

        RerankOutcome {
            results,
            applied: false,
        }
    }
}

fn assign_ranks(results: &mut [RankedCandidate]) {
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = (i + 1) as u32;
    }
}

// ============================================================================
// Score fusion
// ============================================================================

/// `final = α·dense + (1−α)·sigmoid(rerank)`.
///
/// The sigmoid maps the cross-encoder's unbounded score onto [0, 1] so it
/// is commensurable with the cosine score.
pub fn fuse_scores(dense_score: f32, rerank_score: f32, alpha: f32) -> f32 {
    alpha * dense_score + (1.0 - alpha) * sigmoid(rerank_score)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Representative text for the cross-encoder: title plus body, truncated at
/// a word boundary under `max_chars`.
pub fn representative_text(resource: &Resource, max_chars: usize) -> String {
    let title = resource.title.trim();
    let body = resource.text.as_deref().unwrap_or("").trim();

    let truncated = truncate_at_word(body, max_chars);
    match (title.is_empty(), truncated.is_empty()) {
        (false, false) => format!("{title}. {truncated}"),
        (false, true) => title.to_string(),
        (true, _) => truncated,
    }
}

fn truncate_at_word(text: &str, max_chars: usize) -> String {
    let Some(cut) = text.char_indices().nth(max_chars).map(|(i, _)| i) else {
        return text.to_string();
    };

    let head = &text[..cut];
    let boundary = head
        .rfind(char::is_whitespace)
        .unwrap_or(head.len());
    format!("{}...", head[..boundary].trim_end())
}

// ============================================================================
// Tests
// ============================================================================
