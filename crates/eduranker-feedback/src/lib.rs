//! Eduranker Feedback - The inference ledger
//!
//! Records every recommendation the pipeline produces, accepts user
//! feedback on individual inferences, and computes the aggregate statistics
//! that gate cross-encoder refinement. The ledger is strictly bookkeeping:
//! the training loop itself is an external collaborator behind the
//! `RefinementRunner` trait.

use chrono::{DateTime, Utc};
use eduranker_core::{
    DocumentStore, EdurankerError, FeedbackConfig, FeedbackKind, FeedbackStats, Inference,
    InferenceStore, QueryStore, RefinementReport, RefinementRunner, Result, TrainingPair,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

// ============================================================================
// Feedback Ledger
// ============================================================================

/// Bookkeeping for recommendations and their feedback.
pub struct FeedbackLedger {
    inferences: Arc<dyn InferenceStore>,
    queries: Arc<dyn QueryStore>,
    documents: Arc<dyn DocumentStore>,
    config: FeedbackConfig,
}

impl FeedbackLedger {
    pub fn new(
        inferences: Arc<dyn InferenceStore>,
        queries: Arc<dyn QueryStore>,
        documents: Arc<dyn DocumentStore>,
        config: FeedbackConfig,
    ) -> Self {
        Self {
            inferences,
            queries,
            documents,
            config,
        }
    }

    /// Append one inference record and return its identifier.
    ///
    /// Each record succeeds or fails on its own; the orchestrator persists a
    /// response's records independently so one failed write never aborts the
    /// batch.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_inference(
        &self,
        query_id: &str,
        resource_id: &str,
        dense_score: f32,
        rerank_score: Option<f32>,
        final_score: f32,
        rank: u32,
        session_id: Option<String>,
    ) -> Result<String> {
        if rank == 0 {
            return Err(EdurankerError::Validation(
                "inference rank must be 1-based".to_string(),
            ));
        }

        let mut inference = Inference::new(
            query_id,
            resource_id,
            dense_score,
            rerank_score,
            final_score,
            rank,
        );
        inference.session_id = session_id;

        let id = self.inferences.save_inference(inference).await?;
        tracing::debug!(inference_id = %id, rank, "inference recorded");
        Ok(id)
    }

    /// Set the feedback on an inference.
    ///
    /// Fails with `NotFound` for an unknown id. Policy is last-write-wins:
    /// repeated submissions overwrite the previous value and refresh the
    /// feedback timestamp, so a user changing their mind updates the
    /// training signal.
    pub async fn record_feedback(&self, inference_id: &str, kind: FeedbackKind) -> Result<()> {
        let updated = self.inferences.update_feedback(inference_id, kind).await?;
        if !updated {
            return Err(EdurankerError::NotFound(format!(
                "inference {inference_id}"
            )));
        }
        tracing::info!(inference_id = %inference_id, feedback = %kind, "feedback recorded");
        Ok(())
    }

    /// Aggregate feedback counts.
    pub async fn aggregate_stats(&self) -> Result<FeedbackStats> {
        let inferences = self.inferences.all().await?;
        let mut stats = FeedbackStats::default();

        for inference in &inferences {
            match inference.feedback {
                Some(FeedbackKind::Like) => stats.likes += 1,
                Some(FeedbackKind::Dislike) => stats.dislikes += 1,
                Some(FeedbackKind::Click) => stats.clicks += 1,
                Some(FeedbackKind::View) => stats.views += 1,
                None => continue,
            }
            stats.total_feedback += 1;
        }
        stats.training_pairs = stats.likes + stats.dislikes;

        Ok(stats)
    }

    /// Whether enough labeled pairs have accumulated to refine the model.
    pub async fn is_refinement_eligible(&self, min_pairs: usize) -> Result<bool> {
        Ok(self.aggregate_stats().await?.training_pairs >= min_pairs)
    }

    /// Labeled (query text, document text) pairs for the refinement runner.
    ///
    /// Inferences whose query or resource can no longer be hydrated are
    /// skipped rather than failing the export.
    pub async fn training_pairs(&self) -> Result<Vec<TrainingPair>> {
        let inferences = self.inferences.all().await?;
        let mut pairs = Vec::new();

        for inference in inferences {
            let Some(label) = inference.feedback.and_then(|f| f.label()) else {
                continue;
            };

            let Some(query) = self.queries.find_by_id(&inference.query_id).await? else {
                tracing::warn!(query_id = %inference.query_id, "training pair skipped, query missing");
                continue;
            };

            let resources = self
                .documents
                .find_by_ids(std::slice::from_ref(&inference.resource_id))
                .await?;
            let Some(resource) = resources.into_iter().next() else {
                tracing::warn!(resource_id = %inference.resource_id, "training pair skipped, resource missing");
                continue;
            };

            let document_text = match resource.text.as_deref() {
                Some(text) => format!("{}. {}", resource.title, text),
                None => resource.title.clone(),
            };

            pairs.push(TrainingPair {
                query_text: query.question,
                document_text,
                label,
            });
        }

        tracing::info!(pairs = pairs.len(), "training pairs exported");
        Ok(pairs)
    }

    /// Run the external refinement collaborator when eligible.
    ///
    /// Returns `Ok(None)` when the ledger has not accumulated enough labeled
    /// pairs yet.
    pub async fn refine_if_eligible(
        &self,
        runner: &dyn RefinementRunner,
    ) -> Result<Option<RefinementReport>> {
        let stats = self.aggregate_stats().await?;
        if stats.training_pairs < self.config.min_training_pairs {
            tracing::info!(
                have = stats.training_pairs,
                need = self.config.min_training_pairs,
                "refinement not eligible yet"
            );
            return Ok(None);
        }

        let pairs = self.training_pairs().await?;
        let report = runner.refine(&pairs).await?;
        tracing::info!(
            trained = report.trained_pairs,
            version = %report.model_version,
            "refinement completed"
        );
        Ok(Some(report))
    }

    /// All inferences for a query, ordered by rank.
    pub async fn inferences_for_query(&self, query_id: &str) -> Result<Vec<Inference>> {
        self.inferences.find_by_query(query_id).await
    }

    /// Analysis report over the whole ledger.
    pub async fn ledger_report(&self) -> Result<LedgerReport> {
        let inferences = self.inferences.all().await?;
        Ok(LedgerReport::from_inferences(&inferences))
    }
}

// ============================================================================
// Ledger Report
// ============================================================================

/// Aggregates over the whole inference ledger, for operational analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReport {
    pub total_inferences: usize,
    pub unique_queries: usize,
    pub unique_resources: usize,

    pub mean_dense_score: Option<f32>,
    pub mean_rerank_score: Option<f32>,
    pub mean_final_score: Option<f32>,

    /// Inference count per rank position
    pub rank_distribution: BTreeMap<u32, usize>,

    pub with_feedback: usize,

    /// Share of inferences carrying feedback, in [0, 1]
    pub feedback_rate: f32,

    pub generated_at: DateTime<Utc>,
}

impl LedgerReport {
    fn from_inferences(inferences: &[Inference]) -> Self {
        let total = inferences.len();

        let unique_queries = inferences
            .iter()
            .map(|i| i.query_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        let unique_resources = inferences
            .iter()
            .map(|i| i.resource_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let mean = |values: Vec<f32>| -> Option<f32> {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f32>() / values.len() as f32)
            }
        };

        let mut rank_distribution = BTreeMap::new();
        for inference in inferences {
            *rank_distribution.entry(inference.rank).or_insert(0) += 1;
        }

        let with_feedback = inferences.iter().filter(|i| i.feedback.is_some()).count();
        let feedback_rate = if total == 0 {
            0.0
        } else {
            with_feedback as f32 / total as f32
        };

        Self {
            total_inferences: total,
            unique_queries,
            unique_resources,
            mean_dense_score: mean(inferences.iter().map(|i| i.dense_score).collect()),
            mean_rerank_score: mean(inferences.iter().filter_map(|i| i.rerank_score).collect()),
            mean_final_score: mean(inferences.iter().map(|i| i.final_score).collect()),
            rank_distribution,
            with_feedback,
            feedback_rate,
            generated_at: Utc::now(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eduranker_core::{
        MemoryDocumentStore, MemoryInferenceStore, MemoryQueryStore, Resource,
    };

    struct Fixture {
        ledger: FeedbackLedger,
        queries: Arc<MemoryQueryStore>,
        documents: Arc<MemoryDocumentStore>,
    }

    fn fixture() -> Fixture {
        let inferences = Arc::new(MemoryInferenceStore::new());
        let queries = Arc::new(MemoryQueryStore::new());
        let documents = Arc::new(MemoryDocumentStore::new());
        let ledger = FeedbackLedger::new(
            Arc::clone(&inferences) as Arc<dyn InferenceStore>,
            Arc::clone(&queries) as Arc<dyn QueryStore>,
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
            FeedbackConfig::default(),
        );
        Fixture {
            ledger,
            queries,
            documents,
        }
    }

    #[tokio::test]
    async fn test_record_feedback_unknown_id_is_not_found() {
        let fixture = fixture();
        let result = fixture
            .ledger
            .record_feedback("missing", FeedbackKind::Like)
            .await;
        assert!(matches!(result, Err(EdurankerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_training_pairs_count_only_labeled_feedback() {
        let fixture = fixture();

        let mut ids = Vec::new();
        for rank in 1..=4 {
            let id = fixture
                .ledger
                .record_inference("q1", &format!("r{rank}"), 0.8, None, 0.8, rank, None)
                .await
                .unwrap();
            ids.push(id);
        }

        let before = fixture.ledger.aggregate_stats().await.unwrap();
        assert_eq!(before.training_pairs, 0);

        fixture
            .ledger
            .record_feedback(&ids[0], FeedbackKind::Like)
            .await
            .unwrap();
        let after_like = fixture.ledger.aggregate_stats().await.unwrap();
        assert_eq!(after_like.training_pairs, before.training_pairs + 1);

        fixture
            .ledger
            .record_feedback(&ids[1], FeedbackKind::Dislike)
            .await
            .unwrap();
        let after_dislike = fixture.ledger.aggregate_stats().await.unwrap();
        assert_eq!(after_dislike.training_pairs, 2);

        fixture
            .ledger
            .record_feedback(&ids[2], FeedbackKind::Click)
            .await
            .unwrap();
        fixture
            .ledger
            .record_feedback(&ids[3], FeedbackKind::View)
            .await
            .unwrap();
        let after_engagement = fixture.ledger.aggregate_stats().await.unwrap();
        assert_eq!(after_engagement.training_pairs, 2);
        assert_eq!(after_engagement.total_feedback, 4);
        assert_eq!(after_engagement.clicks, 1);
        assert_eq!(after_engagement.views, 1);
    }

    #[tokio::test]
    async fn test_feedback_overwrite_is_last_write_wins() {
        let fixture = fixture();
        let id = fixture
            .ledger
            .record_inference("q1", "r1", 0.8, None, 0.8, 1, None)
            .await
            .unwrap();

        fixture
            .ledger
            .record_feedback(&id, FeedbackKind::Like)
            .await
            .unwrap();
        fixture
            .ledger
            .record_feedback(&id, FeedbackKind::Dislike)
            .await
            .unwrap();

        let stats = fixture.ledger.aggregate_stats().await.unwrap();
        assert_eq!(stats.likes, 0);
        assert_eq!(stats.dislikes, 1);
        assert_eq!(stats.training_pairs, 1);
    }

    #[tokio::test]
    async fn test_eligibility_boundary() {
        let fixture = fixture();

        for i in 0u32..10 {
            let id = fixture
                .ledger
                .record_inference("q1", &format!("r{i}"), 0.5, None, 0.5, i + 1, None)
                .await
                .unwrap();
            if i < 9 {
                fixture
                    .ledger
                    .record_feedback(&id, FeedbackKind::Like)
                    .await
                    .unwrap();
            } else {
                // Hold the 10th back to check the boundary from below
                assert!(!fixture.ledger.is_refinement_eligible(10).await.unwrap());
                fixture
                    .ledger
                    .record_feedback(&id, FeedbackKind::Like)
                    .await
                    .unwrap();
            }
        }

        assert!(fixture.ledger.is_refinement_eligible(10).await.unwrap());
    }

    #[tokio::test]
    async fn test_rank_zero_rejected() {
        let fixture = fixture();
        let result = fixture
            .ledger
            .record_inference("q1", "r1", 0.5, None, 0.5, 0, None)
            .await;
        assert!(matches!(result, Err(EdurankerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_training_pair_export_hydrates_texts() {
        let fixture = fixture();

        let saved = fixture
            .queries
            .save_query("how to learn rust", None, None)
            .await
            .unwrap();
        let resource_id = fixture
            .documents
            .insert(
                Resource::new("Rust Book", "https://example.com/rust", "wikipedia")
                    .with_text("The Rust programming language."),
            )
            .await
            .unwrap();

        let inference_id = fixture
            .ledger
            .record_inference(&saved.id, &resource_id, 0.9, Some(3.0), 0.92, 1, None)
            .await
            .unwrap();
        fixture
            .ledger
            .record_feedback(&inference_id, FeedbackKind::Like)
            .await
            .unwrap();

        // A labeled inference pointing at a vanished resource is skipped
        let orphan = fixture
            .ledger
            .record_inference(&saved.id, "gone", 0.5, None, 0.5, 2, None)
            .await
            .unwrap();
        fixture
            .ledger
            .record_feedback(&orphan, FeedbackKind::Dislike)
            .await
            .unwrap();

        let pairs = fixture.ledger.training_pairs().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].query_text, "how to learn rust");
        assert_eq!(
            pairs[0].document_text,
            "Rust Book. The Rust programming language."
        );
        assert_eq!(pairs[0].label, 1.0);
    }

    #[tokio::test]
    async fn test_refine_if_eligible_gates_the_runner() {
        struct CountingRunner {
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl RefinementRunner for CountingRunner {
            async fn refine(&self, pairs: &[TrainingPair]) -> Result<RefinementReport> {
                self.calls
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(RefinementReport {
                    trained_pairs: pairs.len(),
                    model_version: "v-test".to_string(),
                    completed_at: Utc::now(),
                })
            }
        }

        let fixture = fixture();
        let runner = CountingRunner {
            calls: std::sync::atomic::AtomicUsize::new(0),
        };

        // Below threshold: runner never invoked
        let report = fixture.ledger.refine_if_eligible(&runner).await.unwrap();
        assert!(report.is_none());
        assert_eq!(runner.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ledger_report_aggregates() {
        let fixture = fixture();

        for (query, rank, dense) in [("q1", 1, 0.9), ("q1", 2, 0.7), ("q2", 1, 0.8)] {
            fixture
                .ledger
                .record_inference(query, "r-shared", dense, None, dense, rank, None)
                .await
                .unwrap();
        }

        let report = fixture.ledger.ledger_report().await.unwrap();
        assert_eq!(report.total_inferences, 3);
        assert_eq!(report.unique_queries, 2);
        assert_eq!(report.unique_resources, 1);
        assert_eq!(report.rank_distribution.get(&1), Some(&2));
        assert_eq!(report.rank_distribution.get(&2), Some(&1));
        assert!(report.mean_rerank_score.is_none());
        let mean = report.mean_dense_score.unwrap();
        assert!((mean - 0.8).abs() < 1e-6);
        assert_eq!(report.with_feedback, 0);
        assert_eq!(report.feedback_rate, 0.0);
    }
}
