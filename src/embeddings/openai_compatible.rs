//! OpenAI-compatible embedding transport (spec §6).
//!
//! Request/response shape ported from the retrieved `hephaex-MinKy`
//! embedding service (`Authorization: Bearer`, JSON body, `data[].embedding`
//! extraction); batching and retry are layered on top per spec §4.2/§7.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

use super::EmbeddingProvider;

/// Speaks the OpenAI-compatible `/embeddings` endpoint directly, with no
/// retry or timeout policy of its own — callers (`Indexer`, `Retriever`)
/// wrap calls to this provider in `with_retry_and_timeout`, which also
/// lets them forward a `CancellationToken` so an in-flight request can be
/// interrupted rather than only ever timing out.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_key: impl Into<String>, embedding: &EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: embedding.base_url.clone(),
            model: embedding.model.clone(),
            dimension: embedding.dimension,
            batch_size: embedding.batch_size,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingsRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
            encoding_format: "float",
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::embedding_with_source("embedding request failed", e.into()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::embedding(format!("embedding provider returned {status}: {body}")));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RagError::embedding_with_source("failed to parse embedding response", e.into()))?;

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        Ok(items.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut embeddings = self.embed_batch(&texts).await?;
        embeddings
            .pop()
            .ok_or_else(|| RagError::embedding("embedding provider returned no vectors"))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embeddings = self.embed_batch(batch).await?;
            out.extend(embeddings);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest {
    input: Vec<String>,
    model: String,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDataItem>,
}

#[derive(Deserialize)]
struct EmbeddingsDataItem {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_response_sorts_by_index() {
        let mut items = vec![
            EmbeddingsDataItem { embedding: vec![2.0], index: 1 },
            EmbeddingsDataItem { embedding: vec![1.0], index: 0 },
        ];
        items.sort_by_key(|item| item.index);
        assert_eq!(items[0].embedding, vec![1.0]);
        assert_eq!(items[1].embedding, vec![2.0]);
    }

    #[test]
    fn provider_reports_configured_dimension() {
        let config = EmbeddingConfig::default();
        let provider = OpenAiCompatibleProvider::new("sk-test", &config);
        assert_eq!(provider.dimension(), config.dimension);
    }
}
