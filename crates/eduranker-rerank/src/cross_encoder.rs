//! Cross-encoder gateway client
//!
//! Talks to a rerank inference server over HTTP. Availability is probed at
//! connect time; an unreachable server puts the gateway into degraded mode
//! instead of failing construction, and the `Reranker` then passes the
//! dense ranking through.

use async_trait::async_trait;
use eduranker_core::{CrossEncoderGateway, EdurankerError, RerankConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// HTTP cross-encoder gateway.
///
/// POSTs `{"query": ..., "texts": [...]}` to `<endpoint>/rerank` and
/// expects one `{index, score}` item per text.
pub struct RestCrossEncoderGateway {
    client: Client,
    endpoint: String,
    available: AtomicBool,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponseItem {
    index: usize,
    score: f32,
}

impl RestCrossEncoderGateway {
    /// Create a client assumed to be available (no probe).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EdurankerError::Upstream(format!("cross-encoder client init: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            available: AtomicBool::new(true),
        })
    }

    /// Create a client and probe the server's health endpoint.
    ///
    /// An unreachable or unhealthy server yields a degraded (but usable)
    /// gateway, never an error.
    pub async fn connect(config: &RerankConfig) -> Result<Self> {
        let gateway = Self::new(
            config.endpoint.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;

        let healthy = gateway
            .client
            .get(format!("{}/health", gateway.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        if !healthy {
            tracing::warn!(
                endpoint = %gateway.endpoint,
                "cross-encoder server unreachable, reranking will run in degraded mode"
            );
        }
        gateway.available.store(healthy, Ordering::SeqCst);
        Ok(gateway)
    }

    async fn request_scores(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/rerank", self.endpoint))
            .json(&RerankRequest { query, texts })
            .send()
            .await
            .map_err(|e| EdurankerError::Upstream(format!("rerank request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EdurankerError::Upstream(format!(
                "cross-encoder server returned {status}: {body}"
            )));
        }

        let items: Vec<RerankResponseItem> = response
            .json()
            .await
            .map_err(|e| EdurankerError::Upstream(format!("parse rerank response: {e}")))?;

        let mut scores = vec![0.0f32; texts.len()];
        for item in items {
            if item.index < scores.len() {
                scores[item.index] = item.score;
            }
        }
        Ok(scores)
    }
}

#[async_trait]
impl CrossEncoderGateway for RestCrossEncoderGateway {
    async fn score(&self, query: &str, document: &str) -> Result<f32> {
        let scores = self
            .score_batch(query, std::slice::from_ref(&document.to_string()))
            .await?;
        scores.into_iter().next().ok_or_else(|| {
            EdurankerError::Upstream("cross-encoder returned no score".to_string())
        })
    }

    async fn score_batch(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        self.request_scores(query, documents).await
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
