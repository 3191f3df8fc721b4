//! Eduranker Index - In-memory nearest-neighbor index over resource embeddings
//!
//! Cosine similarity via inner product over L2-normalized vectors. The live
//! index is an immutable snapshot behind a generation pointer: rebuilds and
//! incremental adds construct the replacement entirely off to the side and
//! swap it in one atomic step, so concurrent searches never observe a
//! partially populated index.

use eduranker_core::{DocumentStore, EdurankerError, IndexConfig, Result};
use ndarray::{concatenate, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod cache;
pub mod embedding;

pub use cache::{CacheConfig, CacheCounters, EmbeddingCache};
pub use embedding::RestEmbeddingGateway;

// ============================================================================
// Snapshot
// ============================================================================

/// One immutable generation of the index: a row matrix of normalized
/// vectors and the parallel resource-id list.
///
/// `ids.len() == vectors.nrows()` always holds; construction fails rather
/// than producing a snapshot that violates it.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    vectors: Array2<f32>,
    ids: Vec<String>,
}

impl IndexSnapshot {
    /// A valid empty snapshot
    pub fn empty(dimension: usize) -> Self {
        Self {
            vectors: Array2::zeros((0, dimension)),
            ids: Vec::new(),
        }
    }

    /// Build a snapshot from `(id, embedding)` pairs.
    ///
    /// Rows with the wrong dimension or a zero norm are skipped and logged;
    /// malformed documents must not block indexing of valid ones. Returns
    /// the snapshot and the skip count.
    pub fn build(dimension: usize, entries: Vec<(String, Vec<f32>)>) -> Result<(Self, usize)> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut flat = Vec::with_capacity(entries.len() * dimension);
        let mut skipped = 0usize;

        for (id, mut vector) in entries {
            if vector.len() != dimension {
                tracing::warn!(
                    resource_id = %id,
                    expected = dimension,
                    got = vector.len(),
                    "skipping embedding with wrong dimension"
                );
                skipped += 1;
                continue;
            }
            if !normalize(&mut vector) {
                tracing::warn!(resource_id = %id, "skipping zero-norm embedding");
                skipped += 1;
                continue;
            }
            flat.extend_from_slice(&vector);
            ids.push(id);
        }

        let rows = ids.len();
        let vectors = Array2::from_shape_vec((rows, dimension), flat).map_err(|e| {
            EdurankerError::InvariantViolation(format!("index matrix shape mismatch: {e}"))
        })?;

        let snapshot = Self { vectors, ids };
        snapshot.check_cardinality()?;
        Ok((snapshot, skipped))
    }

    /// Build a new snapshot with `entries` appended after this one's rows.
    pub fn append(&self, dimension: usize, entries: Vec<(String, Vec<f32>)>) -> Result<(Self, usize)> {
        let (addition, skipped) = Self::build(dimension, entries)?;
        if addition.ids.is_empty() {
            return Ok((self.clone(), skipped));
        }

        let vectors = concatenate(Axis(0), &[self.vectors.view(), addition.vectors.view()])
            .map_err(|e| {
                EdurankerError::InvariantViolation(format!("index append shape mismatch: {e}"))
            })?;
        let mut ids = self.ids.clone();
        ids.extend(addition.ids);

        let snapshot = Self { vectors, ids };
        snapshot.check_cardinality()?;
        Ok((snapshot, skipped))
    }

    /// Up to `k` `(id, score)` pairs by descending similarity.
    ///
    /// `query` must already have the snapshot's dimension. An empty snapshot
    /// or a zero-norm query yields no candidates.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        if self.ids.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut query = query.to_vec();
        if !normalize(&mut query) {
            return Vec::new();
        }

        let scores = self.vectors.dot(&Array1::from_vec(query));

        let mut hits: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k.min(self.ids.len()));

        hits.into_iter()
            .map(|(row, score)| (self.ids[row].clone(), score))
            .collect()
    }

    /// Number of indexed vectors
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn check_cardinality(&self) -> Result<()> {
        if self.ids.len() != self.vectors.nrows() {
            return Err(EdurankerError::InvariantViolation(format!(
                "id list ({}) and vector matrix ({}) cardinality mismatch",
                self.ids.len(),
                self.vectors.nrows()
            )));
        }
        Ok(())
    }
}

/// L2-normalize in place. Returns false for a zero-norm vector.
fn normalize(vector: &mut [f32]) -> bool {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return false;
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    true
}

// ============================================================================
// Index statistics
// ============================================================================

/// Point-in-time index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub vector_count: usize,
    pub dimension: usize,
    pub id_count: usize,
}

// ============================================================================
// Vector Index
// ============================================================================

/// The live vector index over the document store's embeddings.
///
/// Searches are pure reads against the current snapshot; rebuild/add
/// replace the snapshot atomically. The document store remains the source
/// of truth and survives rebuilds.
pub struct VectorIndex {
    store: Arc<dyn DocumentStore>,
    config: IndexConfig,
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl VectorIndex {
    /// Create an uninitialized (empty) index
    pub fn new(store: Arc<dyn DocumentStore>, config: IndexConfig) -> Self {
        let empty = Arc::new(IndexSnapshot::empty(config.dimension));
        Self {
            store,
            config,
            snapshot: RwLock::new(empty),
        }
    }

    /// Rebuild the entire index from every stored resource with an
    /// embedding, replacing the live snapshot atomically. Zero eligible
    /// documents produce a valid empty index. Returns the indexed count.
    pub async fn rebuild_from_store(&self) -> Result<usize> {
        let entries = self.store.find_with_embeddings().await?;
        let (snapshot, skipped) = IndexSnapshot::build(self.config.dimension, entries)?;
        let count = snapshot.len();

        *self.snapshot.write().await = Arc::new(snapshot);

        tracing::info!(indexed = count, skipped, "index rebuilt from store");
        Ok(count)
    }

    /// Append the embeddings of the given resources without disturbing
    /// prior entries. An empty id list is a successful no-op. Returns the
    /// number of vectors added.
    pub async fn add(&self, resource_ids: &[String]) -> Result<usize> {
        if resource_ids.is_empty() {
            return Ok(0);
        }

        let resources = self.store.find_by_ids(resource_ids).await?;
        let entries: Vec<(String, Vec<f32>)> = resources
            .into_iter()
            .filter_map(|r| r.embedding.map(|e| (r.id, e)))
            .collect();

        let current = self.current().await;
        let before = current.len();
        let (next, skipped) = current.append(self.config.dimension, entries)?;
        let added = next.len() - before;

        *self.snapshot.write().await = Arc::new(next);

        tracing::info!(added, skipped, total = before + added, "index extended");
        Ok(added)
    }

    /// Up to `k` `(id, score)` pairs by descending similarity; `k` is
    /// clamped to the index size. An empty or uninitialized index yields an
    /// empty list, which callers treat as "no candidates".
    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != self.config.dimension {
            return Err(EdurankerError::Validation(format!(
                "query vector dimension {} does not match index dimension {}",
                query.len(),
                self.config.dimension
            )));
        }

        let snapshot = self.current().await;
        Ok(snapshot.search(query, k))
    }

    /// Number of indexed vectors
    pub async fn len(&self) -> usize {
        self.current().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.current().await.is_empty()
    }

    /// Point-in-time statistics
    pub async fn stats(&self) -> IndexStats {
        let snapshot = self.current().await;
        IndexStats {
            vector_count: snapshot.vectors.nrows(),
            dimension: self.config.dimension,
            id_count: snapshot.ids.len(),
        }
    }

    /// Serialize the current snapshot to its two co-located artifacts.
    ///
    /// Both files are written to temporaries and renamed into place, so a
    /// failed write leaves any previously persisted snapshot intact.
    pub async fn persist(&self) -> Result<()> {
        let snapshot = self.current().await;
        persist_snapshot(&self.config.path, &snapshot)?;
        tracing::info!(
            vectors = snapshot.len(),
            path = %self.config.path.display(),
            "index persisted"
        );
        Ok(())
    }

    /// Load a previously persisted snapshot.
    ///
    /// Fails closed: returns false (never an error) when either artifact is
    /// missing, unreadable, or inconsistent, so callers fall back to
    /// `rebuild_from_store`.
    pub async fn load(&self) -> bool {
        match load_snapshot(&self.config.path, self.config.dimension) {
            Ok(snapshot) => {
                let count = snapshot.len();
                *self.snapshot.write().await = Arc::new(snapshot);
                tracing::info!(vectors = count, "index loaded from disk");
                true
            }
            Err(reason) => {
                tracing::warn!(%reason, "no persisted index available");
                false
            }
        }
    }

    async fn current(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }
}

// ============================================================================
// Snapshot persistence
// ============================================================================

#[derive(Serialize, Deserialize)]
struct VectorsArtifact {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

fn artifact_paths(stem: &Path) -> (PathBuf, PathBuf) {
    let mut vectors = stem.as_os_str().to_owned();
    vectors.push(".vectors.json");
    let mut ids = stem.as_os_str().to_owned();
    ids.push(".ids.json");
    (PathBuf::from(vectors), PathBuf::from(ids))
}

fn persist_snapshot(stem: &Path, snapshot: &IndexSnapshot) -> Result<()> {
    if let Some(parent) = stem.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EdurankerError::Storage(format!("create index dir: {e}")))?;
        }
    }

    let artifact = VectorsArtifact {
        dimension: snapshot.vectors.ncols(),
        vectors: snapshot
            .vectors
            .rows()
            .into_iter()
            .map(|row| row.to_vec())
            .collect(),
    };

    let (vectors_path, ids_path) = artifact_paths(stem);
    write_atomic(&vectors_path, &serde_json::to_vec(&artifact).map_err(json_err)?)?;
    write_atomic(&ids_path, &serde_json::to_vec(&snapshot.ids).map_err(json_err)?)?;
    Ok(())
}

fn load_snapshot(stem: &Path, dimension: usize) -> std::result::Result<IndexSnapshot, String> {
    let (vectors_path, ids_path) = artifact_paths(stem);

    let vectors_raw = std::fs::read(&vectors_path)
        .map_err(|e| format!("read {}: {e}", vectors_path.display()))?;
    let ids_raw =
        std::fs::read(&ids_path).map_err(|e| format!("read {}: {e}", ids_path.display()))?;

    let artifact: VectorsArtifact =
        serde_json::from_slice(&vectors_raw).map_err(|e| format!("parse vectors: {e}"))?;
    let ids: Vec<String> =
        serde_json::from_slice(&ids_raw).map_err(|e| format!("parse ids: {e}"))?;

    if artifact.dimension != dimension {
        return Err(format!(
            "persisted dimension {} does not match configured {dimension}",
            artifact.dimension
        ));
    }
    if artifact.vectors.len() != ids.len() {
        return Err(format!(
            "artifact cardinality mismatch: {} vectors, {} ids",
            artifact.vectors.len(),
            ids.len()
        ));
    }
    if let Some(bad) = artifact.vectors.iter().find(|v| v.len() != dimension) {
        return Err(format!(
            "persisted vector of dimension {} in a {dimension}-dimension index",
            bad.len()
        ));
    }

    let rows = ids.len();
    let flat: Vec<f32> = artifact.vectors.into_iter().flatten().collect();
    let vectors = Array2::from_shape_vec((rows, dimension), flat)
        .map_err(|e| format!("rebuild matrix: {e}"))?;

    Ok(IndexSnapshot { vectors, ids })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| EdurankerError::Storage(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| EdurankerError::Storage(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

fn json_err(e: serde_json::Error) -> EdurankerError {
    EdurankerError::Storage(format!("serialize index artifact: {e}"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use eduranker_core::{MemoryDocumentStore, Resource};
    use proptest::prelude::*;

    const DIM: usize = 4;

    fn test_config(path: PathBuf) -> IndexConfig {
        IndexConfig {
            dimension: DIM,
            path,
            search_top_k: 50,
        }
    }

    async fn seeded_store(embeddings: &[(&str, Vec<f32>)]) -> (Arc<MemoryDocumentStore>, Vec<String>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut ids = Vec::new();
        for (title, embedding) in embeddings {
            let resource =
                Resource::new(*title, format!("https://example.com/{title}"), "wikipedia")
                    .with_embedding(embedding.clone());
            ids.push(store.insert(resource).await.unwrap());
        }
        (store, ids)
    }

    #[tokio::test]
    async fn test_rebuild_then_self_match() {
        let (store, ids) = seeded_store(&[
            ("a", vec![1.0, 0.0, 0.0, 0.0]),
            ("b", vec![0.0, 1.0, 0.0, 0.0]),
            ("c", vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .await;

        let index = VectorIndex::new(store, test_config(PathBuf::from("unused")));
        let count = index.rebuild_from_store().await.unwrap();
        assert_eq!(count, 3);

        let hits = index.search(&[0.0, 1.0, 0.0, 0.0], 3).await.unwrap();
        assert_eq!(hits[0].0, ids[1]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_rebuild_empty_store_is_valid_empty_index() {
        let (store, _) = seeded_store(&[]).await;
        let index = VectorIndex::new(store, test_config(PathBuf::from("unused")));

        assert_eq!(index.rebuild_from_store().await.unwrap(), 0);
        assert!(index.is_empty().await);
        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_add_empty_is_noop() {
        let (store, _) = seeded_store(&[("a", vec![1.0, 0.0, 0.0, 0.0])]).await;
        let index = VectorIndex::new(store, test_config(PathBuf::from("unused")));
        index.rebuild_from_store().await.unwrap();

        let added = index.add(&[]).await.unwrap();
        assert_eq!(added, 0);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_to_uninitialized_index() {
        let (store, ids) = seeded_store(&[
            ("a", vec![1.0, 0.0, 0.0, 0.0]),
            ("b", vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await;

        let index = VectorIndex::new(store, test_config(PathBuf::from("unused")));
        let added = index.add(&ids[..1].to_vec()).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(index.len().await, 1);

        // Appending must not disturb prior entries
        let added = index.add(&ids[1..].to_vec()).await.unwrap();
        assert_eq!(added, 1);

        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, ids[0]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_skipped_not_fatal() {
        let (store, ids) = seeded_store(&[
            ("good", vec![1.0, 0.0, 0.0, 0.0]),
            ("bad", vec![1.0, 0.0]),
            ("zero", vec![0.0, 0.0, 0.0, 0.0]),
        ])
        .await;

        let index = VectorIndex::new(store, test_config(PathBuf::from("unused")));
        let count = index.rebuild_from_store().await.unwrap();
        assert_eq!(count, 1);

        let hits = index.search(&[1.0, 0.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, ids[0]);
    }

    #[tokio::test]
    async fn test_search_rejects_wrong_query_dimension() {
        let (store, _) = seeded_store(&[("a", vec![1.0, 0.0, 0.0, 0.0])]).await;
        let index = VectorIndex::new(store, test_config(PathBuf::from("unused")));
        index.rebuild_from_store().await.unwrap();

        let result = index.search(&[1.0, 0.0], 1).await;
        assert!(matches!(result, Err(EdurankerError::Validation(_))));
    }

    #[tokio::test]
    async fn test_persist_load_roundtrip_score_parity() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("index");

        let (store, _) = seeded_store(&[
            ("a", vec![0.9, 0.1, 0.0, 0.0]),
            ("b", vec![0.2, 0.8, 0.0, 0.3]),
            ("c", vec![0.1, 0.1, 0.7, 0.1]),
        ])
        .await;

        let index = VectorIndex::new(Arc::clone(&store) as Arc<dyn DocumentStore>, test_config(stem.clone()));
        index.rebuild_from_store().await.unwrap();
        let query = [0.5, 0.5, 0.1, 0.0];
        let before = index.search(&query, 3).await.unwrap();
        index.persist().await.unwrap();

        let reloaded = VectorIndex::new(store, test_config(stem));
        assert!(reloaded.load().await);
        let after = reloaded.search(&query, 3).await.unwrap();

        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.0, a.0);
            assert!((b.1 - a.1).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_load_fails_closed_on_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("index");

        let (store, _) = seeded_store(&[("a", vec![1.0, 0.0, 0.0, 0.0])]).await;
        let index = VectorIndex::new(Arc::clone(&store) as Arc<dyn DocumentStore>, test_config(stem.clone()));
        index.rebuild_from_store().await.unwrap();
        index.persist().await.unwrap();

        // Removing one artifact makes the pair unusable as a unit
        std::fs::remove_file(dir.path().join("index.ids.json")).unwrap();

        let reloaded = VectorIndex::new(store, test_config(stem));
        assert!(!reloaded.load().await);
        assert!(reloaded.is_empty().await);
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _) = seeded_store(&[("a", vec![1.0, 0.0, 0.0, 0.0])]).await;
        let index = VectorIndex::new(store, test_config(PathBuf::from("unused")));
        index.rebuild_from_store().await.unwrap();

        let stats = index.stats().await;
        assert_eq!(stats.vector_count, 1);
        assert_eq!(stats.id_count, 1);
        assert_eq!(stats.dimension, DIM);
    }

    proptest! {
        #[test]
        fn prop_search_sorted_and_clamped(
            rows in prop::collection::vec(
                prop::collection::vec(-1.0f32..1.0, DIM),
                0..24,
            ),
            query in prop::collection::vec(-1.0f32..1.0, DIM),
            k in 0usize..32,
        ) {
            let entries: Vec<(String, Vec<f32>)> = rows
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("r{i}"), v))
                .collect();
            let total = entries.len();

            let (snapshot, skipped) = IndexSnapshot::build(DIM, entries).unwrap();
            let hits = snapshot.search(&query, k);

            prop_assert!(hits.len() <= k);
            prop_assert!(hits.len() <= total - skipped);
            for pair in hits.windows(2) {
                prop_assert!(pair[0].1 >= pair[1].1);
            }
        }
    }
}
