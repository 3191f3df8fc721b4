//! Caching for query-text embeddings
//!
//! A user question is embedded at most once per TTL window no matter how
//! many pipeline runs it participates in. Uses the moka crate for
//! thread-safe, async-compatible LRU caching with TTL support.

use moka::future::Cache;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the embedding cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached embeddings
    pub max_capacity: u64,

    /// Time-to-live for entries in seconds
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            ttl_seconds: 3600,
        }
    }
}

/// Hit/miss counters snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
}

/// Cache for query embeddings, keyed by a hash of the text.
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<u64, Vec<f32>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl EmbeddingCache {
    /// Create with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();

        Self {
            cache,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get a cached embedding
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let result = self.cache.get(&hash_text(text)).await;
        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Store an embedding
    pub async fn put(&self, text: &str, embedding: Vec<f32>) {
        self.cache.insert(hash_text(text), embedding).await;
    }

    /// Current entry count
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Hit/miss counters
    pub fn counters(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Tests
// ============================================================================
