//! Embedding-provider collaborator (spec §6) and retry/timeout policy
//! (spec §7).
//!
//! `EmbeddingProvider` mirrors the teacher's `EmbeddingModel` trait
//! (`crates/shodh-rag/src/embeddings/mod.rs`): a single-text method plus
//! a default batch method that maps over it, so a provider only needs to
//! implement the one-at-a-time case. `openai_compatible` is the one
//! concrete transport shipped with the crate, grounded on the retrieved
//! `hephaex-MinKy` embedding service's OpenAI HTTP request shape.

mod openai_compatible;
mod retry;

pub use openai_compatible::OpenAiCompatibleProvider;
pub use retry::with_retry_and_timeout;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}
