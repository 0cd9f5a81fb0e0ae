//! Query-time retrieval (spec §4.4).
//!
//! The query-embed-then-delegate-to-store shape follows the teacher's
//! `RAGEngine` (`crates/shodh-rag/src/rag_engine.rs`); the page/chapter
//! "where is the reader right now" context operations have no teacher
//! analogue (the teacher has no reading-position concept) and are built
//! directly from spec.md §4.4.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::config::RagConfig;
use crate::embeddings::{with_retry_and_timeout, EmbeddingProvider};
use crate::error::Result;
use crate::store::Store;
use crate::types::{Chunk, ScoredChunk};

pub struct Retriever {
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    config: RagConfig,
}

impl Retriever {
    pub fn new(embedding_provider: Option<Arc<dyn EmbeddingProvider>>, config: RagConfig) -> Self {
        Self { embedding_provider, config }
    }

    pub fn is_book_indexed(&self, store: &Store) -> Result<bool> {
        store.is_indexed()
    }

    /// Embeds the query (tolerating a failed embedding by falling back
    /// to BM25-only, per the same tolerant policy as indexing) and fuses
    /// vector + BM25 candidates for `query`.
    pub async fn hybrid_search(&self, store: &Store, query: &str, k: usize, max_page: Option<usize>) -> Result<Vec<ScoredChunk>> {
        let embedding = match &self.embedding_provider {
            Some(provider) => {
                // Query embedding has no caller-supplied cancellation source;
                // this token only ever times out per-attempt, it's never cancelled.
                let cancellation = CancellationToken::new();
                match with_retry_and_timeout(&self.config.retry, &cancellation, || provider.embed_one(query)).await {
                    Ok(embedding) => Some(embedding),
                    Err(error) => {
                        tracing::warn!(error = %error, "query embedding failed; falling back to lexical-only search");
                        None
                    }
                }
            }
            None => None,
        };

        store.hybrid_search(embedding.as_deref(), query, k, max_page)
    }

    pub fn get_page_context_chunks(&self, store: &Store, page: usize) -> Result<Vec<Chunk>> {
        store.get_chunks_for_page(page)
    }

    /// All chunks belonging to the section the reader's current page
    /// falls within, so a chat turn can ground on the whole chapter
    /// rather than a single page. Empty if the page has no chunks.
    pub fn get_chapter_context_chunks(&self, store: &Store, page: usize) -> Result<Vec<Chunk>> {
        let page_chunks = store.get_chunks_for_page(page)?;
        let Some(section_index) = page_chunks.first().map(|c| c.section_index) else {
            return Ok(Vec::new());
        };
        store.get_chunks_for_section(section_index)
    }
}
