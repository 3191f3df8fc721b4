//! Embedding gateway client
//!
//! Talks to a sentence-transformers-style inference server over HTTP. The
//! model itself is a black box: text in, fixed-dimension vector out.

use async_trait::async_trait;
use eduranker_core::{
    EdurankerError, EmbeddingConfig, EmbeddingGateway, IndexConfig, Result,
};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// HTTP embedding gateway.
///
/// POSTs `{"inputs": [...]}` to `<endpoint>/embed` and expects one vector
/// per input, in order. Every request carries a bounded timeout; a timeout
/// is an `Upstream` failure, never a panic.
pub struct RestEmbeddingGateway {
    client: Client,
    endpoint: String,
    dimension: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

impl RestEmbeddingGateway {
    /// Create a new gateway client
    pub fn new(
        endpoint: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EdurankerError::Upstream(format!("embedding client init: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            dimension,
        })
    }

    /// Create from config
    pub fn from_config(embedding: &EmbeddingConfig, index: &IndexConfig) -> Result<Self> {
        Self::new(
            embedding.endpoint.clone(),
            index.dimension,
            Duration::from_secs(embedding.timeout_secs),
        )
    }

    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embed", self.endpoint))
            .json(&EmbedRequest { inputs })
            .send()
            .await
            .map_err(|e| EdurankerError::Upstream(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EdurankerError::Upstream(format!(
                "embedding server returned {status}: {body}"
            )));
        }

        response
            .json::<Vec<Vec<f32>>>()
            .await
            .map_err(|e| EdurankerError::Upstream(format!("parse embedding response: {e}")))
    }
}

#[async_trait]
impl EmbeddingGateway for RestEmbeddingGateway {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let mut batch = self.embed_batch(&[text.trim().to_string()]).await?;
        Ok(batch.pop().flatten())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        // Empty inputs never reach the server
        let valid: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, t.trim().to_string()))
            .collect();

        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        if valid.is_empty() {
            return Ok(out);
        }

        let inputs: Vec<String> = valid.iter().map(|(_, t)| t.clone()).collect();
        let vectors = self.request_embeddings(&inputs).await?;

        if vectors.len() != inputs.len() {
            return Err(EdurankerError::Upstream(format!(
                "embedding server returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            )));
        }

        for ((slot, _), vector) in valid.into_iter().zip(vectors) {
            if vector.len() == self.dimension {
                out[slot] = Some(vector);
            } else {
                tracing::warn!(
                    expected = self.dimension,
                    got = vector.len(),
                    "dropping embedding with unexpected dimension"
                );
            }
        }

        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Tests
// ============================================================================
