//! Tunable configuration for the RAG core (spec §2/§9).
//!
//! Shaped after the teacher's `RAGConfig`/`ChunkingConfig`/
//! `EmbeddingConfig`/`SearchConfig` (`crates/shodh-rag/src/config.rs`):
//! one struct per concern, a `validate()` that rejects nonsensical
//! combinations, and a hand-written `Default` rather than `#[derive]`
//! because the defaults are not all zero values.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Rolling-window chunking knobs (spec §4.1) plus the page-size constant
/// used to derive page numbers from cumulative character offsets (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    /// Characters per page, for page-number derivation. Recorded on
    /// `BookIndexMeta` at index time so changing this later doesn't
    /// silently renumber already-indexed books.
    pub page_size_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 175,
            min_chunk_size: 100,
            page_size_chars: 1800,
        }
    }
}

/// Embedding-provider dimensionality and the OpenAI-compatible batch size
/// named in spec §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub dimension: usize,
    pub model: String,
    pub base_url: String,
    pub batch_size: usize,
}

pub const OPENAI_EMBEDDING_BATCH_SIZE: usize = 5;

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: 1536,
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            batch_size: OPENAI_EMBEDDING_BATCH_SIZE,
        }
    }
}

/// Hybrid-search fusion weights and fixed-point constants from spec §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_k: usize,
    pub candidate_multiplier: usize,
    pub vector_weight: f32,
    pub bm25_weight: f32,
    /// Score forced onto reader-position context chunks so they always
    /// outrank fused results (max fused score is 1.0).
    pub context_chunk_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            candidate_multiplier: 2,
            vector_weight: 1.0,
            bm25_weight: 0.8,
            context_chunk_score: 2.0,
        }
    }
}

/// Exponential backoff with jitter for embedding-provider calls (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 4_000,
            timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub retry: RetryConfig,
}

impl RagConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size < 50 {
            return Err(RagError::config("chunk_size must be at least 50"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(RagError::config("chunk_overlap must be smaller than chunk_size"));
        }
        if self.chunking.min_chunk_size == 0 {
            return Err(RagError::config("min_chunk_size must be greater than zero"));
        }
        if self.chunking.page_size_chars == 0 {
            return Err(RagError::config("page_size_chars must be greater than zero"));
        }
        if self.embedding.dimension == 0 {
            return Err(RagError::config("embedding dimension must be greater than zero"));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::config("embedding batch_size must be greater than zero"));
        }
        if self.search.default_k == 0 {
            return Err(RagError::config("default_k must be greater than zero"));
        }
        if self.search.candidate_multiplier == 0 {
            return Err(RagError::config("candidate_multiplier must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(RagError::config("retry max_attempts must be greater than zero"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(RagError::config("retry base_delay_ms must not exceed max_delay_ms"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut config = RagConfig::default();
        config.embedding.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_delay_bounds_are_checked() {
        let mut config = RagConfig::default();
        config.retry.base_delay_ms = config.retry.max_delay_ms + 1;
        assert!(config.validate().is_err());
    }
}
