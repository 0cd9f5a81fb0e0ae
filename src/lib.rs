//! Per-book retrieval-augmented-generation core.
//!
//! Chunks a book's sections into page-anchored passages, drives an
//! embedding-backed indexing pipeline, persists chunks/BM25/metadata in a
//! per-book store, and answers retrieval queries by fusing dense vector
//! similarity with BM25 lexical scores. Prompt construction, token
//! streaming, and document parsing are the host application's job.

pub mod cancellation;
pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod indexer;
pub mod orchestration;
pub mod retriever;
pub mod store;
pub mod types;

pub use cancellation::CancellationToken;
pub use chunker::{Chunker, SectionInput, SectionNode, TocEntry};
pub use config::RagConfig;
pub use error::{ErrorKind, RagError, Result};
pub use indexer::{IndexOutcome, Indexer, ProgressCallback};
pub use orchestration::{ChatOrchestrator, LastSources, RequestSnapshot, SourceSnapshot};
pub use retriever::Retriever;
pub use store::Store;
pub use types::{
    BookHash, BookIndexMeta, Chunk, ChunkId, Conversation, IndexingPhase, IndexingState,
    IndexingStatus, Message, MessageRole, ProgressEvent, ScoredChunk, SearchMethod,
};

/// Install a `tracing` subscriber for local development and tests.
///
/// Host applications own subscriber installation in production (as the
/// teacher's Tauri shell does in `app/src-tauri/src/lib.rs`); this helper
/// exists only so examples and tests get readable output without every
/// call site repeating the boilerplate.
pub fn init_tracing_for_tests() {
    #[cfg(test)]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}
