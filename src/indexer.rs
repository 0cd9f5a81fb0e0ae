//! Chunk → embed → persist pipeline (spec §4.2).
//!
//! Progress reporting and cancellation-checkpoint shape come from the
//! teacher's `index_folder` (`crates/shodh-rag/src/indexing.rs`):
//! a cancellation check before each unit of work, a progress callback
//! invoked as work proceeds. Generalized from folder/file batch indexing
//! to the single-book chunk/embed/persist pipeline the spec describes;
//! the teacher's pause/resume and panic-isolated-per-file machinery has
//! no spec counterpart and isn't carried over.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::chunker::{Chunker, SectionInput, TocEntry};
use crate::config::RagConfig;
use crate::embeddings::{with_retry_and_timeout, EmbeddingProvider};
use crate::error::{ErrorKind, Result};
use crate::store::{Bm25Engine, Store};
use crate::types::{BookHash, BookIndexMeta, Chunk, IndexingPhase, IndexingState, IndexingStatus, ProgressEvent};

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexOutcome {
    pub chunk_count: usize,
    pub status: IndexingStatus,
}

pub struct Indexer {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    config: RagConfig,
}

impl Indexer {
    pub fn new(embedding_provider: Arc<dyn EmbeddingProvider>, config: RagConfig) -> Self {
        Self { embedding_provider, config }
    }

    /// Records the book's pollable `IndexingState` (spec §3 lifecycle:
    /// "created on indexBook start; discarded on clear") and fires the
    /// push-based progress callback, if one was given.
    fn report(store: &Store, progress: Option<&ProgressCallback>, book_hash: &BookHash, status: IndexingStatus, phase: IndexingPhase, current: usize, total: usize) {
        store.set_indexing_state(IndexingState {
            book_hash: book_hash.clone(),
            status,
            phase,
            current,
            total,
        });
        if let Some(callback) = progress {
            callback(ProgressEvent { book_hash: book_hash.clone(), phase, current, total });
        }
    }

    /// Indexes a book. No-ops (spec §4.2 idempotency) if `store` already
    /// holds completed metadata for this book.
    #[allow(clippy::too_many_arguments)]
    pub async fn index_book(
        &self,
        store: &Store,
        book_hash: &BookHash,
        book_title: &str,
        author_name: &str,
        sections: &[SectionInput],
        toc: &[TocEntry],
        cancellation: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<IndexOutcome> {
        if let Some(meta) = store.load_meta()? {
            return Ok(IndexOutcome {
                chunk_count: meta.chunk_count,
                status: if meta.vectors_incomplete { IndexingStatus::CompletedDegraded } else { IndexingStatus::Completed },
            });
        }

        cancellation.check()?;

        let chunker = Chunker::from_config(&self.config.chunking);
        let mut chunks = self.chunk_phase(store, &chunker, book_hash, sections, toc, cancellation, progress.as_ref())?;

        let vectors_incomplete = self
            .embedding_phase(store, &mut chunks, cancellation, progress.as_ref(), book_hash)
            .await?;

        let meta = self.persist_phase(
            store,
            book_hash,
            book_title,
            author_name,
            sections.len(),
            &chunks,
            vectors_incomplete,
            progress.as_ref(),
        )?;

        Ok(IndexOutcome {
            chunk_count: meta.chunk_count,
            status: if vectors_incomplete { IndexingStatus::CompletedDegraded } else { IndexingStatus::Completed },
        })
    }

    fn chunk_phase(
        &self,
        store: &Store,
        chunker: &Chunker,
        book_hash: &BookHash,
        sections: &[SectionInput],
        toc: &[TocEntry],
        cancellation: &CancellationToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<Vec<Chunk>> {
        let total = sections.len();
        let mut chunks = Vec::new();
        let mut offset = 0usize;

        for (i, section) in sections.iter().enumerate() {
            cancellation.check()?;
            let section_chunks;
            (section_chunks, offset) = chunker.chunk_section(book_hash, section, toc, offset);
            chunks.extend(section_chunks);
            Self::report(store, progress, book_hash, IndexingStatus::InProgress, IndexingPhase::Chunking, i + 1, total);
        }

        Ok(chunks)
    }

    /// Embeds every chunk in batches, returning `true` if a terminal
    /// provider failure forced a tolerant degrade to BM25-only coverage
    /// for the remaining chunks (spec §9 open-question resolution). A
    /// cancellation observed either between batches or mid-request
    /// (forwarded into `with_retry_and_timeout`) aborts the whole call
    /// with `IndexingAborted` per spec §4.2/§5 — it never degrades
    /// quietly into a completed result.
    async fn embedding_phase(
        &self,
        store: &Store,
        chunks: &mut [Chunk],
        cancellation: &CancellationToken,
        progress: Option<&ProgressCallback>,
        book_hash: &BookHash,
    ) -> Result<bool> {
        let batch_size = self.config.embedding.batch_size.max(1);
        let total = chunks.len();
        let mut degraded = false;

        let mut processed = 0usize;
        for batch_start in (0..chunks.len()).step_by(batch_size) {
            if degraded {
                break;
            }
            cancellation.check()?;

            let batch_end = (batch_start + batch_size).min(chunks.len());
            let texts: Vec<String> = chunks[batch_start..batch_end].iter().map(|c| c.text.clone()).collect();

            let provider = self.embedding_provider.as_ref();
            let result = with_retry_and_timeout(&self.config.retry, cancellation, || provider.embed_many(&texts)).await;

            match result {
                Ok(embeddings) => {
                    for (chunk, embedding) in chunks[batch_start..batch_end].iter_mut().zip(embeddings) {
                        chunk.embedding = Some(embedding);
                    }
                }
                Err(error) if error.kind() == ErrorKind::Aborted => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        book_hash = %book_hash,
                        error = %error,
                        "embedding provider failed terminally; degrading to BM25-only coverage"
                    );
                    degraded = true;
                }
            }

            processed = batch_end;
            Self::report(store, progress, book_hash, IndexingStatus::InProgress, IndexingPhase::Embedding, processed, total);
        }

        Ok(degraded)
    }

    /// Persists chunks, BM25 index, and metadata in that order (meta last
    /// signals completion to the idempotency guard), reporting progress
    /// against spec §4.2's phase table: `total=2`, `current` 0 → chunks
    /// saved, 1 → BM25 saved, 2 → meta saved.
    #[allow(clippy::too_many_arguments)]
    fn persist_phase(
        &self,
        store: &Store,
        book_hash: &BookHash,
        book_title: &str,
        author_name: &str,
        total_sections: usize,
        chunks: &[Chunk],
        vectors_incomplete: bool,
        progress: Option<&ProgressCallback>,
    ) -> Result<BookIndexMeta> {
        Self::report(store, progress, book_hash, IndexingStatus::InProgress, IndexingPhase::Persisting, 0, 2);
        store.save_chunks(chunks.to_vec())?;

        let mut engine = Bm25Engine::new();
        for chunk in chunks {
            engine.upsert(&chunk.id, &chunk.text, chunk.chapter_title.clone());
        }
        engine.recalculate_avgdl();
        Self::report(store, progress, book_hash, IndexingStatus::InProgress, IndexingPhase::Persisting, 1, 2);
        store.save_bm25(&engine)?;

        let meta = BookIndexMeta {
            book_hash: book_hash.clone(),
            book_title: book_title.to_string(),
            author_name: author_name.to_string(),
            indexed_at: chrono::Utc::now(),
            chunk_count: chunks.len(),
            total_sections,
            page_size_chars: self.config.chunking.page_size_chars,
            embedding_model: self.config.embedding.model.clone(),
            vectors_incomplete,
        };
        store.save_meta(&meta)?;
        let status = if vectors_incomplete { IndexingStatus::CompletedDegraded } else { IndexingStatus::Completed };
        Self::report(store, progress, book_hash, status, IndexingPhase::Persisting, 2, 2);

        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::chunker::{SectionInput, SectionNode};
    use crate::error::{RagError, Result as RagResult};

    struct FakeProvider {
        dimension: usize,
        fail_after: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        async fn embed_one(&self, text: &str) -> RagResult<Vec<f32>> {
            Ok(vec![text.len() as f32; self.dimension])
        }

        async fn embed_many(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_after) = self.fail_after {
                if call >= fail_after {
                    return Err(RagError::embedding("provider down"));
                }
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    /// Simulates a cancellation arriving while an embedding request is
    /// in flight: cancels the shared token as a side effect of its first
    /// call, then returns normally.
    struct CancelMidwayProvider {
        dimension: usize,
        cancel_token: CancellationToken,
    }

    #[async_trait]
    impl EmbeddingProvider for CancelMidwayProvider {
        async fn embed_one(&self, text: &str) -> RagResult<Vec<f32>> {
            Ok(vec![text.len() as f32; self.dimension])
        }

        async fn embed_many(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
            self.cancel_token.cancel();
            Ok(texts.iter().map(|t| vec![t.len() as f32; self.dimension]).collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }

    fn sections(n: usize) -> Vec<SectionInput> {
        (0..n)
            .map(|i| SectionInput { index: i, dom: SectionNode::Text("word ".repeat(100)) })
            .collect()
    }

    fn temp_store() -> (Store, crate::store::test_support::TempDir) {
        let tmp = crate::store::test_support::TempDir::new();
        let store = Store::open(tmp.path(), BookHash("book1".to_string()), crate::config::SearchConfig::default()).unwrap();
        (store, tmp)
    }

    #[tokio::test]
    async fn indexes_book_and_marks_completed() {
        let (store, _tmp) = temp_store();
        let provider = Arc::new(FakeProvider { dimension: 4, fail_after: None, calls: AtomicUsize::new(0) });
        let indexer = Indexer::new(provider, RagConfig::default());
        let book_hash = BookHash("book1".to_string());
        let outcome = indexer
            .index_book(&store, &book_hash, "Dune", "Frank Herbert", &sections(2), &[], &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, IndexingStatus::Completed);
        assert!(outcome.chunk_count > 0);
        assert!(store.is_indexed().unwrap());
        let meta = store.load_meta().unwrap().unwrap();
        assert_eq!(meta.book_title, "Dune");
        assert_eq!(meta.author_name, "Frank Herbert");
        assert_eq!(meta.total_sections, 2);
        assert_eq!(meta.embedding_model, RagConfig::default().embedding.model);
    }

    #[tokio::test]
    async fn second_call_is_a_no_op() {
        let (store, _tmp) = temp_store();
        let provider = Arc::new(FakeProvider { dimension: 4, fail_after: None, calls: AtomicUsize::new(0) });
        let indexer = Indexer::new(provider, RagConfig::default());
        let book_hash = BookHash("book1".to_string());
        let first = indexer
            .index_book(&store, &book_hash, "Dune", "Frank Herbert", &sections(2), &[], &CancellationToken::new(), None)
            .await
            .unwrap();
        let second = indexer
            .index_book(&store, &book_hash, "Dune", "Frank Herbert", &sections(2), &[], &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(first.chunk_count, second.chunk_count);
    }

    #[tokio::test]
    async fn cancellation_before_start_aborts() {
        let (store, _tmp) = temp_store();
        let provider = Arc::new(FakeProvider { dimension: 4, fail_after: None, calls: AtomicUsize::new(0) });
        let indexer = Indexer::new(provider, RagConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let result = indexer
            .index_book(&store, &BookHash("book1".to_string()), "Dune", "Frank Herbert", &sections(2), &[], &token, None)
            .await;
        assert!(result.is_err());
        assert!(!store.is_indexed().unwrap());
    }

    #[tokio::test]
    async fn cancellation_during_embedding_aborts_and_leaves_book_unindexed() {
        let (store, _tmp) = temp_store();
        let token = CancellationToken::new();
        let provider = Arc::new(CancelMidwayProvider { dimension: 4, cancel_token: token.clone() });
        let mut config = RagConfig::default();
        config.embedding.batch_size = 1;
        let indexer = Indexer::new(provider, config);
        let book_hash = BookHash("book1".to_string());

        let result = indexer
            .index_book(&store, &book_hash, "Dune", "Frank Herbert", &sections(2), &[], &token, None)
            .await;

        let error = result.expect_err("cancellation mid-embedding must reject, not complete");
        assert_eq!(error.kind(), ErrorKind::Aborted);
        assert!(!store.is_indexed().unwrap());
    }

    #[tokio::test]
    async fn terminal_embedding_failure_degrades_instead_of_failing() {
        let (store, _tmp) = temp_store();
        let provider = Arc::new(FakeProvider { dimension: 4, fail_after: Some(0), calls: AtomicUsize::new(0) });
        let mut config = RagConfig::default();
        config.embedding.batch_size = 1;
        config.retry.max_attempts = 1;
        let indexer = Indexer::new(provider, config);
        let book_hash = BookHash("book1".to_string());
        let outcome = indexer
            .index_book(&store, &book_hash, "Dune", "Frank Herbert", &sections(2), &[], &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome.status, IndexingStatus::CompletedDegraded);
        let chunks = store.load_chunks().unwrap();
        assert!(chunks.iter().all(|c| c.embedding.is_none()));
        let meta = store.load_meta().unwrap().unwrap();
        assert!(meta.vectors_incomplete);
    }

    #[tokio::test]
    async fn progress_events_report_chunking_embedding_and_persisting() {
        let (store, _tmp) = temp_store();
        let provider = Arc::new(FakeProvider { dimension: 4, fail_after: None, calls: AtomicUsize::new(0) });
        let indexer = Indexer::new(provider, RagConfig::default());
        let phases = Arc::new(Mutex::new(Vec::new()));
        let phases2 = phases.clone();
        let callback: ProgressCallback = Arc::new(move |event| phases2.lock().unwrap().push(event));
        indexer
            .index_book(
                &store,
                &BookHash("book1".to_string()),
                "Dune",
                "Frank Herbert",
                &sections(2),
                &[],
                &CancellationToken::new(),
                Some(callback),
            )
            .await
            .unwrap();
        let seen = phases.lock().unwrap();
        assert!(seen.iter().any(|e| e.phase == IndexingPhase::Chunking));
        assert!(seen.iter().any(|e| e.phase == IndexingPhase::Embedding));
        let persisting: Vec<usize> = seen.iter().filter(|e| e.phase == IndexingPhase::Persisting).map(|e| e.current).collect();
        assert_eq!(persisting, vec![0, 1, 2]);
        assert!(seen.iter().all(|e| e.phase != IndexingPhase::Persisting || e.total == 2));
    }

    #[tokio::test]
    async fn indexing_state_is_queryable_during_and_after_indexing() {
        let (store, _tmp) = temp_store();
        let provider = Arc::new(FakeProvider { dimension: 4, fail_after: None, calls: AtomicUsize::new(0) });
        let indexer = Indexer::new(provider, RagConfig::default());
        assert!(store.indexing_state().is_none());
        indexer
            .index_book(&store, &BookHash("book1".to_string()), "Dune", "Frank Herbert", &sections(2), &[], &CancellationToken::new(), None)
            .await
            .unwrap();
        let state = store.indexing_state().expect("indexing state should be recorded");
        assert_eq!(state.phase, IndexingPhase::Persisting);
        assert_eq!(state.status, IndexingStatus::Completed);
    }
}
