//! Chat-turn context assembly (spec §4.4/§6).
//!
//! `LastSources` and the settings-snapshot-per-request shape follow the
//! teacher's `ChatContext`/`EventEmitter` pattern
//! (`crates/shodh-rag/src/chat/mod.rs`): a request captures the settings
//! it should run with up front so a concurrent settings change can't
//! alter it mid-flight, and the most recent set of sources used to answer
//! is published somewhere the host can read it back for citation display.
//! The teacher's prompt text, token streaming, and multi-platform
//! (WhatsApp/Telegram/Discord) surfaces have no spec counterpart and
//! aren't carried over — this module only assembles retrieval context.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::RagConfig;
use crate::error::Result;
use crate::retriever::Retriever;
use crate::store::Store;
use crate::types::{BookHash, ScoredChunk, SearchMethod};

/// Settings and reading position captured once per chat turn, so the
/// orchestrator's behavior for a turn is fixed at the moment it starts.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub book_hash: BookHash,
    pub current_page: usize,
    pub config: RagConfig,
}

/// The chunks actually used to ground the most recent response, kept
/// around so the host can render citations after the fact.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub book_hash: BookHash,
    pub chunks: Vec<ScoredChunk>,
}

/// Single-slot cell holding the sources behind the last answered turn.
#[derive(Clone, Default)]
pub struct LastSources(Arc<RwLock<Option<SourceSnapshot>>>);

impl LastSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: SourceSnapshot) {
        *self.0.write() = Some(snapshot);
    }

    pub fn read(&self) -> Option<SourceSnapshot> {
        self.0.read().clone()
    }

    pub fn clear(&self) {
        *self.0.write() = None;
    }
}

pub struct ChatOrchestrator {
    retriever: Retriever,
    last_sources: LastSources,
}

impl ChatOrchestrator {
    pub fn new(retriever: Retriever, last_sources: LastSources) -> Self {
        Self { retriever, last_sources }
    }

    /// Gathers the context chunks for one chat turn: the reader's current
    /// page (forced to the top, since it's always relevant) plus the
    /// hybrid-search hits for `query`, deduped by chunk id with the page
    /// context's forced score winning ties. Publishes the result to
    /// `last_sources` before returning it.
    pub async fn gather_context(&self, store: &Store, snapshot: &RequestSnapshot, query: &str) -> Result<Vec<ScoredChunk>> {
        let k = snapshot.config.search.default_k;
        let max_page = Some(snapshot.current_page);

        let (page_context, hybrid) = tokio::join!(
            async { self.retriever.get_page_context_chunks(store, snapshot.current_page) },
            self.retriever.hybrid_search(store, query, k, max_page),
        );
        let page_context = page_context?;
        let hybrid = hybrid?;

        let context_score = snapshot.config.search.context_chunk_score;
        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::with_capacity(page_context.len() + hybrid.len());

        for chunk in page_context {
            if seen.insert(chunk.id.clone()) {
                merged.push(ScoredChunk { chunk, score: context_score, method: SearchMethod::Context });
            }
        }
        for scored in hybrid {
            if seen.insert(scored.chunk.id.clone()) {
                merged.push(scored);
            }
        }

        self.last_sources.publish(SourceSnapshot {
            book_hash: snapshot.book_hash.clone(),
            chunks: merged.clone(),
        });

        Ok(merged)
    }
}
