//! Eduranker Workflow - End-to-end pipeline orchestration
//!
//! Sequences the six pipeline stages for one user question:
//! query capture, ingestion, index refresh, dense retrieval, reranking, and
//! inference persistence. Every stage is individually fallible and settles
//! into a tagged outcome; failures degrade the pipeline instead of aborting
//! it, and the response always reports per-stage timing, counts, and the
//! accumulated error list. The only hard failures `run` surfaces are input
//! validation and index invariant violations.
//!
//! The orchestrator owns its collaborators by explicit injection, in
//! initialization order: DocumentStore, VectorIndex, Reranker,
//! FeedbackLedger, then the orchestrator itself. `shutdown` flushes the
//! index to disk.

use eduranker_core::{
    detect_language, AppConfig, DocumentStore, EdurankerError, EmbeddingGateway, QueryStore,
    Resource, Result, SourceFetcher,
};
use eduranker_feedback::FeedbackLedger;
use eduranker_index::{CacheConfig, EmbeddingCache, VectorIndex};
use eduranker_rerank::{RankedCandidate, Reranker, RerankOutcome, ScoredCandidate};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod models;

pub use models::{
    RecommendedResource, Stage, StageOutcome, StageReport, WorkflowRequest, WorkflowResponse,
};

// ============================================================================
// Orchestrator
// ============================================================================

/// Sequences the retrieval-and-rerank pipeline across its collaborators.
pub struct WorkflowOrchestrator {
    documents: Arc<dyn DocumentStore>,
    queries: Arc<dyn QueryStore>,
    index: Arc<VectorIndex>,
    reranker: Arc<Reranker>,
    ledger: Arc<FeedbackLedger>,
    embedder: Arc<dyn EmbeddingGateway>,
    embedding_cache: EmbeddingCache,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    config: AppConfig,
}

/// What survived the CaptureQuery stage.
#[derive(Debug, Default)]
struct CapturedQuery {
    query_id: Option<String>,
    dedup_hit: bool,
    embedding: Option<Vec<f32>>,
}

/// What the Ingest stage produced.
#[derive(Debug, Default)]
struct IngestSummary {
    new_ids: Vec<String>,
    inserted: usize,
}

impl WorkflowOrchestrator {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        queries: Arc<dyn QueryStore>,
        index: Arc<VectorIndex>,
        reranker: Arc<Reranker>,
        ledger: Arc<FeedbackLedger>,
        embedder: Arc<dyn EmbeddingGateway>,
        config: AppConfig,
    ) -> Self {
        let embedding_cache = EmbeddingCache::with_config(&CacheConfig {
            max_capacity: config.embedding.cache_capacity,
            ttl_seconds: config.embedding.cache_ttl_secs,
        });
        Self {
            documents,
            queries,
            index,
            reranker,
            ledger,
            embedder,
            embedding_cache,
            fetchers: Vec::new(),
            config,
        }
    }

    /// Register a source fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetchers.push(fetcher);
        self
    }

    /// Bring the index up: load the persisted snapshot, or rebuild from the
    /// document store when none is available.
    pub async fn initialize(&self) -> Result<()> {
        if !self.index.load().await {
            let count = self.index.rebuild_from_store().await?;
            tracing::info!(indexed = count, "no persisted index, rebuilt from store");
        }
        Ok(())
    }

    /// Flush state on teardown: persists the current index snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        self.index.persist().await?;
        tracing::info!("workflow shut down, index flushed");
        Ok(())
    }

    /// Execute the full pipeline for one question.
    ///
    /// Returns `Validation` for an empty question and propagates index
    /// invariant violations; every other failure degrades into the
    /// response's error list.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowResponse> {
        let question = request.question.trim().to_string();
        if question.is_empty() {
            return Err(EdurankerError::Validation(
                "question must not be empty".to_string(),
            ));
        }

        let total = Instant::now();
        let mut reports: Vec<StageReport> = Vec::with_capacity(6);
        let mut errors: Vec<String> = Vec::new();

        tracing::info!(question = %question, "workflow started");

        let sources = if request.sources.is_empty() {
            self.config.ingest.sources.clone()
        } else {
            request.sources.clone()
        };
        let languages = if request.languages.is_empty() {
            self.config.ingest.languages.clone()
        } else {
            request.languages.clone()
        };
        let max_per_source = request
            .max_per_source
            .unwrap_or(self.config.ingest.max_per_source);
        let retrieve_top_k = request
            .retrieve_top_k
            .unwrap_or(self.config.index.search_top_k);
        let final_top_k = request
            .final_top_k
            .unwrap_or(self.config.rerank.final_top_k);

        // Stage 1: persist/deduplicate the question
        let started = Instant::now();
        let captured = settle(
            self.capture_query(&question).await,
            Stage::CaptureQuery,
            started,
            CapturedQuery::default(),
            |c| usize::from(c.query_id.is_some()),
            &mut reports,
            &mut errors,
        );

        // Stage 2: fan out to the source fetchers
        let started = Instant::now();
        let ingested = settle(
            self.ingest(&question, &sources, &languages, max_per_source)
                .await,
            Stage::Ingest,
            started,
            IngestSummary::default(),
            |s| s.inserted,
            &mut reports,
            &mut errors,
        );

        // Stage 3: refresh the index with what ingestion produced
        let started = Instant::now();
        let refresh = self.refresh_index(&ingested.new_ids).await?;
        settle(
            refresh,
            Stage::RefreshIndex,
            started,
            0,
            |n| *n,
            &mut reports,
            &mut errors,
        );

        // Stage 4: dense retrieval + hydration
        let started = Instant::now();
        let retrieve = self
            .retrieve(&question, captured.embedding.clone(), retrieve_top_k)
            .await?;
        let candidates = settle(
            retrieve,
            Stage::Retrieve,
            started,
            Vec::new(),
            |c: &Vec<ScoredCandidate>| c.len(),
            &mut reports,
            &mut errors,
        );
        let retrieved = candidates.len();

        // Stage 5: cross-encoder rerank
        let started = Instant::now();
        let reranked = settle(
            self.rerank(&question, candidates, final_top_k).await,
            Stage::Rerank,
            started,
            RerankOutcome {
                results: Vec::new(),
                applied: false,
            },
            |o| o.results.len(),
            &mut reports,
            &mut errors,
        );

        // Stage 6: record inferences and assemble results
        let started = Instant::now();
        let results = settle(
            self.persist(
                captured.query_id.as_deref(),
                request.session_id.clone(),
                &reranked.results,
            )
            .await,
            Stage::Persist,
            started,
            Vec::new(),
            |r: &Vec<RecommendedResource>| r.len(),
            &mut reports,
            &mut errors,
        );

        let total_duration_ms = total.elapsed().as_millis() as u64;
        tracing::info!(
            duration_ms = total_duration_ms,
            returned = results.len(),
            errors = errors.len(),
            "workflow finished"
        );

        Ok(WorkflowResponse {
            question,
            query_id: captured.query_id,
            query_dedup_hit: captured.dedup_hit,
            ingested: ingested.inserted,
            retrieved,
            returned: results.len(),
            rerank_applied: reranked.applied,
            results,
            stages: reports,
            total_duration_ms,
            errors,
        })
    }

    // ------------------------------------------------------------------
    // Stage 1: CaptureQuery
    // ------------------------------------------------------------------

    async fn capture_query(&self, question: &str) -> StageOutcome<CapturedQuery> {
        let mut problems = Vec::new();

        let embedding = match self.embed_question(question).await {
            Ok(Some(vector)) => Some(vector),
            Ok(None) => {
                problems.push("embedding gateway returned no vector for the question".to_string());
                None
            }
            Err(e) => {
                problems.push(format!("question embedding failed: {e}"));
                None
            }
        };

        let language = detect_language(question).map(str::to_string);

        match self
            .queries
            .save_query(question, embedding.clone(), language)
            .await
        {
            Ok(saved) => {
                tracing::debug!(query_id = %saved.id, dedup = saved.dedup_hit, "question captured");
                let value = CapturedQuery {
                    query_id: Some(saved.id),
                    dedup_hit: saved.dedup_hit,
                    embedding,
                };
                if problems.is_empty() {
                    StageOutcome::Ok(value)
                } else {
                    StageOutcome::Degraded(value, problems.join("; "))
                }
            }
            Err(e) => {
                problems.push(format!("query persistence failed: {e}"));
                StageOutcome::Degraded(
                    CapturedQuery {
                        query_id: None,
                        dedup_hit: false,
                        embedding,
                    },
                    problems.join("; "),
                )
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 2: Ingest
    // ------------------------------------------------------------------

    async fn ingest(
        &self,
        question: &str,
        sources: &[String],
        languages: &[String],
        max_per_source: usize,
    ) -> StageOutcome<IngestSummary> {
        if sources.is_empty() {
            return StageOutcome::Ok(IngestSummary::default());
        }

        let mut problems = Vec::new();
        let fetch_timeout = Duration::from_secs(self.config.ingest.fetch_timeout_secs);

        let mut tasks = Vec::new();
        for source in sources {
            match self.fetchers.iter().find(|f| f.name() == source) {
                Some(fetcher) => {
                    let fetcher = Arc::clone(fetcher);
                    let source = source.clone();
                    tasks.push(async move {
                        let outcome = tokio::time::timeout(
                            fetch_timeout,
                            fetcher.fetch(question, max_per_source, languages),
                        )
                        .await;
                        (source, outcome)
                    });
                }
                None => problems.push(format!("no fetcher registered for source {source}")),
            }
        }

        let mut fetched: Vec<Resource> = Vec::new();
        for (source, outcome) in futures::future::join_all(tasks).await {
            match outcome {
                Ok(Ok(resources)) => {
                    tracing::debug!(source = %source, count = resources.len(), "source fetched");
                    fetched.extend(resources);
                }
                Ok(Err(e)) => problems.push(format!("{source} fetch failed: {e}")),
                Err(_) => problems.push(format!("{source} fetch timed out")),
            }
        }

        let mut summary = IngestSummary::default();
        let mut pending: Vec<(String, String)> = Vec::new();
        for resource in fetched {
            match self
                .documents
                .find_existing(&resource.url, &resource.source)
                .await
            {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    problems.push(format!("dedup lookup failed: {e}"));
                    continue;
                }
            }

            let needs_embedding = resource.embedding.is_none();
            let embed_text = match resource.text.as_deref() {
                Some(text) => format!("{}. {}", resource.title, text),
                None => resource.title.clone(),
            };

            match self.documents.insert(resource).await {
                Ok(id) => {
                    if needs_embedding {
                        pending.push((id.clone(), embed_text));
                    }
                    summary.new_ids.push(id);
                    summary.inserted += 1;
                }
                Err(e) => problems.push(format!("resource insert failed: {e}")),
            }
        }

        // Embedding backfill for resources the fetchers delivered bare
        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
            match tokio::time::timeout(self.embed_timeout(), self.embedder.embed_batch(&texts))
                .await
            {
                Ok(Ok(embeddings)) => {
                    for ((id, _), embedding) in pending.iter().zip(embeddings) {
                        match embedding {
                            Some(vector) => {
                                if let Err(e) =
                                    self.documents.update_embedding(id, vector).await
                                {
                                    problems.push(format!("embedding backfill failed: {e}"));
                                }
                            }
                            None => {
                                tracing::warn!(resource_id = %id, "no embedding produced for resource");
                            }
                        }
                    }
                }
                Ok(Err(e)) => problems.push(format!("resource embedding failed: {e}")),
                Err(_) => problems.push("resource embedding timed out".to_string()),
            }
        }

        if problems.is_empty() {
            StageOutcome::Ok(summary)
        } else {
            StageOutcome::Degraded(summary, problems.join("; "))
        }
    }

    // ------------------------------------------------------------------
    // Stage 3: RefreshIndex
    // ------------------------------------------------------------------

    /// Incremental add when the live index already has content; full
    /// rebuild otherwise. Invariant violations abort the run.
    async fn refresh_index(&self, new_ids: &[String]) -> Result<StageOutcome<usize>> {
        let result = if self.index.is_empty().await {
            self.index.rebuild_from_store().await
        } else {
            self.index.add(new_ids).await
        };

        match result {
            Ok(count) => Ok(StageOutcome::Ok(count)),
            Err(e @ EdurankerError::InvariantViolation(_)) => Err(e),
            Err(e) => Ok(StageOutcome::Failed(format!("index refresh failed: {e}"))),
        }
    }

    // ------------------------------------------------------------------
    // Stage 4: Retrieve
    // ------------------------------------------------------------------

    async fn retrieve(
        &self,
        question: &str,
        embedding: Option<Vec<f32>>,
        top_k: usize,
    ) -> Result<StageOutcome<Vec<ScoredCandidate>>> {
        // Reuse the embedding from query capture; retry once if it failed
        let embedding = match embedding {
            Some(vector) => vector,
            None => match self.embed_question(question).await {
                Ok(Some(vector)) => vector,
                Ok(None) => {
                    return Ok(StageOutcome::Failed(
                        "question embedding unavailable".to_string(),
                    ))
                }
                Err(e) => {
                    return Ok(StageOutcome::Failed(format!(
                        "question embedding failed: {e}"
                    )))
                }
            },
        };

        let hits = match self.index.search(&embedding, top_k).await {
            Ok(hits) => hits,
            Err(e @ EdurankerError::InvariantViolation(_)) => return Err(e),
            Err(e) => return Ok(StageOutcome::Failed(format!("index search failed: {e}"))),
        };

        // An empty index means no candidates, not a failure
        if hits.is_empty() {
            return Ok(StageOutcome::Ok(Vec::new()));
        }

        let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
        let resources = match self.documents.find_by_ids(&ids).await {
            Ok(resources) => resources,
            Err(e) => {
                return Ok(StageOutcome::Failed(format!(
                    "candidate hydration failed: {e}"
                )))
            }
        };

        let mut by_id: HashMap<String, Resource> =
            resources.into_iter().map(|r| (r.id.clone(), r)).collect();

        let mut candidates = Vec::with_capacity(hits.len());
        let mut missing = 0usize;
        for (id, score) in hits {
            match by_id.remove(&id) {
                Some(resource) => candidates.push(ScoredCandidate {
                    resource,
                    dense_score: score,
                }),
                None => missing += 1,
            }
        }

        if missing > 0 {
            tracing::warn!(missing, "retrieved ids missing from the document store");
            return Ok(StageOutcome::Degraded(
                candidates,
                format!("{missing} candidates missing from the document store"),
            ));
        }
        Ok(StageOutcome::Ok(candidates))
    }

    // ------------------------------------------------------------------
    // Stage 5: Rerank
    // ------------------------------------------------------------------

    async fn rerank(
        &self,
        question: &str,
        candidates: Vec<ScoredCandidate>,
        top_k: usize,
    ) -> StageOutcome<RerankOutcome> {
        let had_candidates = !candidates.is_empty();
        let fallback = candidates.clone();
        let timeout = Duration::from_secs(self.config.rerank.timeout_secs);

        match tokio::time::timeout(timeout, self.reranker.rerank(question, candidates, top_k))
            .await
        {
            Ok(Ok(outcome)) if outcome.applied || !had_candidates => StageOutcome::Ok(outcome),
            Ok(Ok(outcome)) => StageOutcome::Degraded(
                outcome,
                "rerank not applied, dense ranking passed through".to_string(),
            ),
            Ok(Err(e)) => StageOutcome::Degraded(
                dense_fallback(fallback, top_k),
                format!("rerank failed: {e}"),
            ),
            Err(_) => StageOutcome::Degraded(
                dense_fallback(fallback, top_k),
                "rerank timed out".to_string(),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Stage 6: Persist
    // ------------------------------------------------------------------

    async fn persist(
        &self,
        query_id: Option<&str>,
        session_id: Option<String>,
        ranked: &[RankedCandidate],
    ) -> StageOutcome<Vec<RecommendedResource>> {
        let Some(query_id) = query_id else {
            // No persisted query to own the inferences; results still go out
            let results = ranked.iter().map(|r| to_recommended(r, None)).collect();
            return StageOutcome::Degraded(
                results,
                "query not persisted, inferences not recorded".to_string(),
            );
        };

        if ranked.is_empty() {
            return StageOutcome::Ok(Vec::new());
        }

        // Each write is independent: one failure never aborts the batch
        let writes = ranked.iter().map(|r| {
            self.ledger.record_inference(
                query_id,
                &r.resource.id,
                r.dense_score,
                r.rerank_score,
                r.final_score,
                r.rank,
                session_id.clone(),
            )
        });
        let outcomes = futures::future::join_all(writes).await;

        let mut problems = Vec::new();
        let results = ranked
            .iter()
            .zip(outcomes)
            .map(|(r, outcome)| match outcome {
                Ok(inference_id) => to_recommended(r, Some(inference_id)),
                Err(e) => {
                    problems.push(format!("inference for rank {} not recorded: {e}", r.rank));
                    to_recommended(r, None)
                }
            })
            .collect();

        if problems.is_empty() {
            StageOutcome::Ok(results)
        } else {
            StageOutcome::Degraded(results, problems.join("; "))
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn embed_question(&self, question: &str) -> Result<Option<Vec<f32>>> {
        if let Some(hit) = self.embedding_cache.get(question).await {
            return Ok(Some(hit));
        }

        let embedded =
            tokio::time::timeout(self.embed_timeout(), self.embedder.embed(question))
                .await
                .map_err(|_| {
                    EdurankerError::Upstream("embedding request timed out".to_string())
                })??;

        if let Some(vector) = &embedded {
            self.embedding_cache.put(question, vector.clone()).await;
        }
        Ok(embedded)
    }

    fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.config.embedding.timeout_secs)
    }
}

/// Fold one stage outcome into the report and error lists, yielding the
/// stage's value (or the fallback).
fn settle<T>(
    outcome: StageOutcome<T>,
    stage: Stage,
    started: Instant,
    fallback: T,
    count: impl Fn(&T) -> usize,
    reports: &mut Vec<StageReport>,
    errors: &mut Vec<String>,
) -> T {
    let (value, error) = match outcome {
        StageOutcome::Ok(value) => (value, None),
        StageOutcome::Degraded(value, reason) => (value, Some(reason)),
        StageOutcome::Failed(reason) => (fallback, Some(reason)),
    };

    if let Some(reason) = &error {
        tracing::warn!(stage = %stage, reason = %reason, "stage degraded");
        errors.push(format!("{stage}: {reason}"));
    }

    reports.push(StageReport {
        stage,
        duration_ms: started.elapsed().as_millis() as u64,
        count: count(&value),
        error,
    });
    value
}

/// Dense-order ranking used when the rerank stage itself fails or times out.
fn dense_fallback(candidates: Vec<ScoredCandidate>, top_k: usize) -> RerankOutcome {
    let mut results: Vec<RankedCandidate> = candidates
        .into_iter()
        .take(top_k)
        .map(|c| RankedCandidate {
            final_score: c.dense_score,
            dense_score: c.dense_score,
            rerank_score: None,
            rank: 0,
            resource: c.resource,
        })
        .collect();
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = (i + 1) as u32;
    }
    RerankOutcome {
        results,
        applied: false,
    }
}

fn to_recommended(ranked: &RankedCandidate, inference_id: Option<String>) -> RecommendedResource {
    RecommendedResource {
        inference_id,
        resource_id: ranked.resource.id.clone(),
        title: ranked.resource.title.clone(),
        url: ranked.resource.url.clone(),
        source: ranked.resource.source.clone(),
        author: ranked.resource.author.clone(),
        keywords: ranked.resource.keywords.clone(),
        dense_score: ranked.dense_score,
        rerank_score: ranked.rerank_score,
        final_score: ranked.final_score,
        rank: ranked.rank,
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
        CrossEncoderGateway, FeedbackConfig, FeedbackKind, InferenceStore, MemoryDocumentStore,
        MemoryInferenceStore, MemoryQueryStore, RerankConfig,
    };

    const DIM: usize = 4;

    /// Embedder stub mapping exact texts to vectors.
    struct StaticEmbedder {
        vectors: HashMap<String, Vec<f32>>,
    }

    #[async_trait]
    impl EmbeddingGateway for StaticEmbedder {
        async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
            Ok(self.vectors.get(text.trim()).cloned())
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
            Ok(texts
                .iter()
                .map(|t| self.vectors.get(t.trim()).cloned())
                .collect())
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    /// Cross-encoder stub returning a flat zero score for every pair.
    struct FlatScorer {
        available: bool,
    }

    #[async_trait]
    impl CrossEncoderGateway for FlatScorer {
        async fn score(&self, _q: &str, _d: &str) -> Result<f32> {
            Ok(0.0)
        }
        async fn score_batch(&self, _q: &str, documents: &[String]) -> Result<Vec<f32>> {
            Ok(vec![0.0; documents.len()])
        }
        fn is_available(&self) -> bool {
            self.available
        }
    }

    /// Fetcher stub serving a fixed resource list.
    struct StubFetcher {
        source: String,
        resources: Vec<Resource>,
    }

    #[async_trait]
    impl SourceFetcher for StubFetcher {
        fn name(&self) -> &str {
            &self.source
        }
        async fn fetch(
            &self,
            _question: &str,
            max_results: usize,
            _languages: &[String],
        ) -> Result<Vec<Resource>> {
            Ok(self.resources.iter().take(max_results).cloned().collect())
        }
    }

    struct Fixture {
        orchestrator: WorkflowOrchestrator,
        ledger: Arc<FeedbackLedger>,
        documents: Arc<MemoryDocumentStore>,
    }

    fn basis(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[axis] = 1.0;
        v
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.index.dimension = DIM;
        // Tests register fetchers explicitly; no implicit default sources
        config.ingest.sources = Vec::new();
        config
    }

    async fn fixture(
        seed: Vec<Resource>,
        question_embeddings: HashMap<String, Vec<f32>>,
        scorer_available: bool,
    ) -> Fixture {
        let documents = Arc::new(MemoryDocumentStore::new());
        for resource in seed {
            documents.insert(resource).await.unwrap();
        }

        let queries = Arc::new(MemoryQueryStore::new());
        let inferences = Arc::new(MemoryInferenceStore::new());
        let config = test_config();

        let index = Arc::new(VectorIndex::new(
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
            config.index.clone(),
        ));
        let reranker = Arc::new(Reranker::new(
            Arc::new(FlatScorer {
                available: scorer_available,
            }),
            RerankConfig::default(),
        ));
        let ledger = Arc::new(FeedbackLedger::new(
            Arc::clone(&inferences) as Arc<dyn InferenceStore>,
            Arc::clone(&queries) as Arc<dyn QueryStore>,
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
            FeedbackConfig::default(),
        ));
        let embedder = Arc::new(StaticEmbedder {
            vectors: question_embeddings,
        });

        let orchestrator = WorkflowOrchestrator::new(
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
            queries,
            index,
            reranker,
            Arc::clone(&ledger),
            embedder,
            config,
        );

        Fixture {
            orchestrator,
            ledger,
            documents,
        }
    }

    fn seeded_resources() -> (Vec<Resource>, Vec<String>) {
        let mut resources = Vec::new();
        let mut ids = Vec::new();
        for (i, title) in ["one", "two", "three"].iter().enumerate() {
            let resource = Resource::new(
                *title,
                format!("https://example.com/{title}"),
                "wikipedia",
            )
            .with_text(format!("Body of document {title}."))
            .with_embedding(basis(i));
            ids.push(resource.id.clone());
            resources.push(resource);
        }
        (resources, ids)
    }

    #[tokio::test]
    async fn test_end_to_end_self_match() {
        let (resources, ids) = seeded_resources();
        let embeddings = HashMap::from([("find doc two".to_string(), basis(1))]);
        let fixture = fixture(resources, embeddings, true).await;
        fixture.orchestrator.initialize().await.unwrap();

        let mut request = WorkflowRequest::new("find doc two");
        request.final_top_k = Some(1);
        let response = fixture.orchestrator.run(request).await.unwrap();

        assert!(response.errors.is_empty(), "errors: {:?}", response.errors);
        let stage_order: Vec<Stage> = response.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stage_order,
            vec![
                Stage::CaptureQuery,
                Stage::Ingest,
                Stage::RefreshIndex,
                Stage::Retrieve,
                Stage::Rerank,
                Stage::Persist,
            ]
        );
        assert!(response.rerank_applied);
        assert_eq!(response.returned, 1);
        assert_eq!(response.results[0].resource_id, ids[1]);
        assert!((response.results[0].dense_score - 1.0).abs() < 1e-5);
        assert_eq!(response.results[0].rank, 1);

        // The inference is on the ledger under the persisted query
        let query_id = response.query_id.clone().unwrap();
        let recorded = fixture
            .ledger
            .inferences_for_query(&query_id)
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].resource_id, ids[1]);

        // Feedback flows against the returned inference id
        let inference_id = response.results[0].inference_id.clone().unwrap();
        fixture
            .ledger
            .record_feedback(&inference_id, FeedbackKind::Like)
            .await
            .unwrap();
        let stats = fixture.ledger.aggregate_stats().await.unwrap();
        assert_eq!(stats.training_pairs, 1);
    }

    #[tokio::test]
    async fn test_unavailable_cross_encoder_degrades_not_aborts() {
        let (resources, _) = seeded_resources();
        let embeddings = HashMap::from([("a question".to_string(), basis(0))]);
        let fixture = fixture(resources, embeddings, false).await;
        fixture.orchestrator.initialize().await.unwrap();

        let response = fixture
            .orchestrator
            .run(WorkflowRequest::new("a question"))
            .await
            .unwrap();

        assert!(!response.rerank_applied);
        assert!(!response.results.is_empty());
        assert!(response.errors.iter().any(|e| e.starts_with("rerank:")));
        for result in &response.results {
            assert!(result.rerank_score.is_none());
            assert_eq!(result.final_score, result.dense_score);
        }
    }

    #[tokio::test]
    async fn test_empty_question_is_validation_error() {
        let fixture = fixture(Vec::new(), HashMap::new(), true).await;
        let result = fixture.orchestrator.run(WorkflowRequest::new("   ")).await;
        assert!(matches!(result, Err(EdurankerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_repeated_question_deduplicates() {
        let (resources, _) = seeded_resources();
        let embeddings = HashMap::from([("same question".to_string(), basis(2))]);
        let fixture = fixture(resources, embeddings, true).await;
        fixture.orchestrator.initialize().await.unwrap();

        let first = fixture
            .orchestrator
            .run(WorkflowRequest::new("same question"))
            .await
            .unwrap();
        let second = fixture
            .orchestrator
            .run(WorkflowRequest::new("same question"))
            .await
            .unwrap();

        assert!(!first.query_dedup_hit);
        assert!(second.query_dedup_hit);
        assert_eq!(first.query_id, second.query_id);
    }

    #[tokio::test]
    async fn test_ingest_inserts_and_deduplicates() {
        let (resources, _) = seeded_resources();
        let duplicate_url = resources[0].url.clone();
        let embeddings = HashMap::from([("fresh topic".to_string(), basis(3))]);

        let fetched = vec![
            // Already collected: same (url, source) as a seeded resource
            Resource::new("one again", duplicate_url, "wikipedia")
                .with_embedding(basis(0)),
            Resource::new("brand new", "https://example.com/new", "wikipedia")
                .with_text("Fresh material.")
                .with_embedding(basis(3)),
        ];

        let fixture = fixture(resources, embeddings, true).await;
        fixture.orchestrator.initialize().await.unwrap();
        let orchestrator = fixture.orchestrator.with_fetcher(Arc::new(StubFetcher {
            source: "wikipedia".to_string(),
            resources: fetched,
        }));

        let mut request = WorkflowRequest::new("fresh topic");
        request.sources = vec!["wikipedia".to_string()];
        request.final_top_k = Some(1);
        let response = orchestrator.run(request).await.unwrap();

        assert!(response.errors.is_empty(), "errors: {:?}", response.errors);
        assert_eq!(response.ingested, 1);
        assert_eq!(fixture.documents.count().await.unwrap(), 4);

        // The freshly ingested resource is immediately searchable
        assert_eq!(response.returned, 1);
        assert_eq!(response.results[0].title, "brand new");
        assert!((response.results[0].dense_score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_missing_fetcher_recorded_not_fatal() {
        let (resources, _) = seeded_resources();
        let embeddings = HashMap::from([("a question".to_string(), basis(0))]);
        let fixture = fixture(resources, embeddings, true).await;
        fixture.orchestrator.initialize().await.unwrap();

        let mut request = WorkflowRequest::new("a question");
        request.sources = vec!["github".to_string()];
        let response = fixture.orchestrator.run(request).await.unwrap();

        assert!(response
            .errors
            .iter()
            .any(|e| e.contains("no fetcher registered")));
        assert!(!response.results.is_empty());
    }

    #[tokio::test]
    async fn test_unembeddable_question_yields_empty_success() {
        let (resources, _) = seeded_resources();
        // The embedder knows nothing about this question
        let fixture = fixture(resources, HashMap::new(), true).await;
        fixture.orchestrator.initialize().await.unwrap();

        let response = fixture
            .orchestrator
            .run(WorkflowRequest::new("unknown question"))
            .await
            .unwrap();

        assert_eq!(response.returned, 0);
        assert!(response.results.is_empty());
        assert!(!response.errors.is_empty());
        assert_eq!(response.stages.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_store_empty_response() {
        let embeddings = HashMap::from([("anything".to_string(), basis(0))]);
        let fixture = fixture(Vec::new(), embeddings, true).await;
        fixture.orchestrator.initialize().await.unwrap();

        let response = fixture
            .orchestrator
            .run(WorkflowRequest::new("anything"))
            .await
            .unwrap();

        // No candidates is a valid empty result, not a failure
        assert_eq!(response.retrieved, 0);
        assert_eq!(response.returned, 0);
        assert!(response.errors.is_empty(), "errors: {:?}", response.errors);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_index() {
        let dir = tempfile::tempdir().unwrap();
        let (resources, _) = seeded_resources();
        let embeddings = HashMap::new();

        let documents = Arc::new(MemoryDocumentStore::new());
        for resource in resources {
            documents.insert(resource).await.unwrap();
        }
        let queries = Arc::new(MemoryQueryStore::new());
        let inferences = Arc::new(MemoryInferenceStore::new());
        let mut config = test_config();
        config.index.path = dir.path().join("index");

        let index = Arc::new(VectorIndex::new(
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
            config.index.clone(),
        ));
        let ledger = Arc::new(FeedbackLedger::new(
            inferences,
            Arc::clone(&queries) as Arc<dyn QueryStore>,
            Arc::clone(&documents) as Arc<dyn DocumentStore>,
            FeedbackConfig::default(),
        ));
        let orchestrator = WorkflowOrchestrator::new(
            documents,
            queries,
            Arc::clone(&index),
            Arc::new(Reranker::new(
                Arc::new(FlatScorer { available: true }),
                RerankConfig::default(),
            )),
            ledger,
            Arc::new(StaticEmbedder {
                vectors: embeddings,
            }),
            config,
        );

        orchestrator.initialize().await.unwrap();
        assert_eq!(index.len().await, 3);
        orchestrator.shutdown().await.unwrap();

        assert!(dir.path().join("index.vectors.json").exists());
        assert!(dir.path().join("index.ids.json").exists());
    }
}
