//! Core data model (spec §3).
//!
//! Field shapes follow the teacher's `ChunkRecord`/`SimpleSearchResult`
//! (`crates/shodh-rag/src/types.rs`) where an analogue exists; the
//! conversation/indexing-state types have no teacher analogue and are
//! built directly from spec.md §3.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sha-256 hex digest identifying a book, supplied by the host
/// application (the crate never computes it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookHash(pub String);

impl fmt::Display for BookHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-book sled database path segment: `readest-ai-{bookHash}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookNamespace(String);

impl BookNamespace {
    pub fn new(book_hash: &BookHash) -> Self {
        Self(format!("readest-ai-{}", book_hash.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Deterministic chunk identifier, a function of `(bookHash,
/// sectionIndex, ordinal)` per spec §3's invariant — enforced here by
/// construction rather than convention at every call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn derive(book_hash: &BookHash, section_index: usize, ordinal: usize) -> Self {
        Self(format!("{}-{}-{}", book_hash.0, section_index, ordinal))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single page-anchored, possibly-overlapping text chunk (spec §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub book_hash: BookHash,
    pub section_index: usize,
    pub ordinal: usize,
    pub text: String,
    pub chapter_title: Option<String>,
    pub page: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub embedding: Option<Vec<f32>>,
}

/// Which retrieval path produced a `ScoredChunk` (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMethod {
    Vector,
    Bm25,
    Hybrid,
    /// Forced in from the reader's current page/section, not ranked.
    Context,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub method: SearchMethod,
}

/// Per-book index bookkeeping persisted alongside the chunks (spec §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookIndexMeta {
    pub book_hash: BookHash,
    pub book_title: String,
    pub author_name: String,
    pub indexed_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub total_sections: usize,
    pub page_size_chars: usize,
    pub embedding_model: String,
    /// `true` when the indexer degraded to BM25-only because the
    /// embedding provider failed terminally (spec §9 open question).
    pub vectors_incomplete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub book_hash: BookHash,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexingPhase {
    Chunking,
    Embedding,
    Persisting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexingStatus {
    InProgress,
    Completed,
    /// Completed with BM25-only coverage after a terminal embedding
    /// failure (spec §9 open question, tolerant variant).
    CompletedDegraded,
    Cancelled,
    Failed,
}

/// Observable indexing state for a single book, reported via
/// `ProgressCallback` (spec §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingState {
    pub book_hash: BookHash,
    pub status: IndexingStatus,
    pub phase: IndexingPhase,
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub book_hash: BookHash,
    pub phase: IndexingPhase,
    pub current: usize,
    pub total: usize,
}
