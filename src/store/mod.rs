//! Per-book persistence: chunks, BM25 index, metadata, conversations
//! (spec §4.3).
//!
//! Shaped after the teacher's `LanceStore`
//! (`crates/shodh-rag/src/storage/lance_store.rs`): one method per
//! object-store kind, caches invalidated on write, a `clear()` escape
//! hatch — generalized from LanceDB/Arrow record batches to a `sled`
//! database with one named `Tree` per object store, since the spec's
//! "one database per book" IndexedDB-style layout maps far more directly
//! onto an embedded KV store than onto a vector database table, and the
//! spec's no-ANN non-goal removes LanceDB's reason for being. Hybrid
//! fusion follows `crates/shodh-rag/src/search/hybrid.rs`'s
//! `weighted_fusion` shape, adapted to the spec's fixed 1.0/0.8 weights
//! and a second dedup pass over near-duplicate overlapping chunk text.

mod bm25;
mod vector;

pub use bm25::{Bm25Blob, Bm25Engine};

use std::collections::HashMap;
use std::path::Path;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::error::{RagError, Result};
use crate::types::{
    BookHash, BookIndexMeta, Chunk, ChunkId, Conversation, IndexingState, Message, ScoredChunk,
    SearchMethod,
};

const DEDUP_KEY_LEN: usize = 100;
const CONVERSATION_CACHE_CAP: usize = 64;

fn dedup_key(text: &str) -> String {
    text.chars().take(DEDUP_KEY_LEN).collect()
}

fn bincode_encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| RagError::store_with_source("failed to encode record", e.into()))
}

fn bincode_decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| RagError::store_with_source("failed to decode record", e.into()))
}

pub struct Store {
    db: sled::Db,
    chunks: sled::Tree,
    book_meta: sled::Tree,
    bm25_index: sled::Tree,
    conversations: sled::Tree,
    messages: sled::Tree,
    book_hash: BookHash,
    search_config: SearchConfig,
    chunk_cache: RwLock<Option<Vec<Chunk>>>,
    bm25_cache: RwLock<Option<Bm25Engine>>,
    conversation_cache: Mutex<LruCache<Uuid, Conversation>>,
    indexing_state: RwLock<Option<IndexingState>>,
}

impl Store {
    /// Opens (creating if absent) the per-book database at
    /// `{data_dir}/readest-ai-{bookHash}`.
    pub fn open(data_dir: &Path, book_hash: BookHash, search_config: SearchConfig) -> Result<Self> {
        let namespace = crate::types::BookNamespace::new(&book_hash);
        let path = data_dir.join(namespace.as_str());
        let db = sled::open(&path)?;
        let chunks = db.open_tree("chunks")?;
        let book_meta = db.open_tree("book_meta")?;
        let bm25_index = db.open_tree("bm25_index")?;
        let conversations = db.open_tree("conversations")?;
        let messages = db.open_tree("messages")?;

        Ok(Self {
            db,
            chunks,
            book_meta,
            bm25_index,
            conversations,
            messages,
            book_hash,
            search_config,
            chunk_cache: RwLock::new(None),
            bm25_cache: RwLock::new(None),
            conversation_cache: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(CONVERSATION_CACHE_CAP).unwrap(),
            )),
            indexing_state: RwLock::new(None),
        })
    }

    pub fn book_hash(&self) -> &BookHash {
        &self.book_hash
    }

    // ---- indexing state ----

    /// Pollable indexing state for this book, distinct from the push-based
    /// `ProgressCallback` (spec §3 lifecycle: "created on indexBook start;
    /// discarded on clear").
    pub fn indexing_state(&self) -> Option<IndexingState> {
        self.indexing_state.read().clone()
    }

    pub fn set_indexing_state(&self, state: IndexingState) {
        *self.indexing_state.write() = Some(state);
    }

    // ---- chunks ----

    /// Replaces the book's entire chunk set. Indexing is single-shot per
    /// book (spec §4.2 idempotency), so there is no partial-update path.
    pub fn save_chunks(&self, chunks: Vec<Chunk>) -> Result<()> {
        for chunk in &chunks {
            let bytes = bincode_encode(chunk)?;
            self.chunks.insert(chunk.id.0.as_bytes(), bytes)?;
        }
        self.chunks.flush()?;
        *self.chunk_cache.write() = Some(chunks);
        Ok(())
    }

    pub fn load_chunks(&self) -> Result<Vec<Chunk>> {
        if let Some(cached) = self.chunk_cache.read().as_ref() {
            return Ok(cached.clone());
        }

        let mut chunks = Vec::new();
        for entry in self.chunks.iter() {
            let (_, value) = entry?;
            chunks.push(bincode_decode(&value)?);
        }
        *self.chunk_cache.write() = Some(chunks.clone());
        Ok(chunks)
    }

    pub fn get_chunks_for_page(&self, page: usize) -> Result<Vec<Chunk>> {
        Ok(self.load_chunks()?.into_iter().filter(|c| c.page == page).collect())
    }

    pub fn get_chunks_for_section(&self, section_index: usize) -> Result<Vec<Chunk>> {
        Ok(self
            .load_chunks()?
            .into_iter()
            .filter(|c| c.section_index == section_index)
            .collect())
    }

    // ---- bm25 ----

    pub fn save_bm25(&self, engine: &Bm25Engine) -> Result<()> {
        let blob = engine.to_blob();
        let json = blob.to_json()?;
        self.bm25_index.insert(self.book_hash.0.as_bytes(), json.as_bytes())?;
        self.bm25_index.flush()?;
        *self.bm25_cache.write() = None;
        Ok(())
    }

    fn with_bm25_engine<T>(&self, f: impl FnOnce(&Bm25Engine) -> T) -> Result<Option<T>> {
        {
            let cache = self.bm25_cache.read();
            if let Some(engine) = cache.as_ref() {
                return Ok(Some(f(engine)));
            }
        }

        let Some(entry) = self.bm25_index.get(self.book_hash.0.as_bytes())? else {
            return Ok(None);
        };
        let json = std::str::from_utf8(&entry)
            .map_err(|e| RagError::store_with_source("bm25 blob is not valid utf-8", e.into()))?;
        let blob = Bm25Blob::from_json(json)?;
        let engine = Bm25Engine::from_blob(blob);
        let result = f(&engine);
        *self.bm25_cache.write() = Some(engine);
        Ok(Some(result))
    }

    // ---- book meta ----

    pub fn save_meta(&self, meta: &BookIndexMeta) -> Result<()> {
        let bytes = bincode_encode(meta)?;
        self.book_meta.insert(self.book_hash.0.as_bytes(), bytes)?;
        self.book_meta.flush()?;
        Ok(())
    }

    pub fn load_meta(&self) -> Result<Option<BookIndexMeta>> {
        match self.book_meta.get(self.book_hash.0.as_bytes())? {
            Some(bytes) => Ok(Some(bincode_decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_indexed(&self) -> Result<bool> {
        Ok(self.load_meta()?.is_some())
    }

    // ---- search ----

    fn spoiler_ok(chunk: &Chunk, max_page: Option<usize>) -> bool {
        match max_page {
            Some(max) => chunk.page <= max,
            None => true,
        }
    }

    fn candidate_limit(&self, k: usize) -> usize {
        k * self.search_config.candidate_multiplier
    }

    /// Per-list normalization per spec §4.3 step 2: divide each score by
    /// the list's max; if the max is zero (or negative), every score
    /// normalizes to zero instead of dividing by ~zero.
    fn normalize_by_max(scores: &[(ChunkId, f32)]) -> HashMap<ChunkId, f32> {
        if scores.is_empty() {
            return HashMap::new();
        }
        let max = scores.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        scores
            .iter()
            .map(|(id, s)| (id.clone(), if max <= 0.0 { 0.0 } else { s / max }))
            .collect()
    }

    pub fn vector_search(&self, query_embedding: &[f32], k: usize, max_page: Option<usize>) -> Result<Vec<ScoredChunk>> {
        let chunks = self.load_chunks()?;
        let mut scored: Vec<ScoredChunk> = chunks
            .into_iter()
            .filter(|c| Self::spoiler_ok(c, max_page))
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_ref()?;
                let score = vector::cosine_similarity(query_embedding, embedding);
                Some(ScoredChunk { chunk, score, method: SearchMethod::Vector })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn bm25_search(&self, query: &str, k: usize, max_page: Option<usize>) -> Result<Vec<ScoredChunk>> {
        let limit = self.candidate_limit(k).max(k);
        let Some(hits) = self.with_bm25_engine(|engine| engine.search(query, limit))? else {
            return Ok(Vec::new());
        };
        let chunks = self.load_chunks()?;
        let by_id: HashMap<ChunkId, Chunk> = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        let mut scored: Vec<ScoredChunk> = hits
            .into_iter()
            .filter_map(|(id, score)| by_id.get(&id).cloned().map(|chunk| (chunk, score)))
            .filter(|(chunk, _)| Self::spoiler_ok(chunk, max_page))
            .map(|(chunk, score)| ScoredChunk { chunk, score, method: SearchMethod::Bm25 })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Fuses dense vector and BM25 candidates with the spec's fixed
    /// 1.0/0.8 weights, then collapses near-duplicate overlapping chunks
    /// by keeping the highest-scoring chunk per first-100-chars text key.
    pub fn hybrid_search(
        &self,
        query_embedding: Option<&[f32]>,
        query_text: &str,
        k: usize,
        max_page: Option<usize>,
    ) -> Result<Vec<ScoredChunk>> {
        let limit = self.candidate_limit(k).max(k);

        let vector_raw: Vec<(ChunkId, f32)> = match query_embedding {
            Some(embedding) => self
                .vector_search(embedding, limit, max_page)?
                .into_iter()
                .map(|sc| (sc.chunk.id.clone(), sc.score))
                .collect(),
            None => Vec::new(),
        };
        let bm25_raw: Vec<(ChunkId, f32)> = self
            .bm25_search(query_text, limit, max_page)?
            .into_iter()
            .map(|sc| (sc.chunk.id.clone(), sc.score))
            .collect();

        let vector_norm = Self::normalize_by_max(&vector_raw);
        let bm25_norm = Self::normalize_by_max(&bm25_raw);

        let mut fused: HashMap<ChunkId, f32> = HashMap::new();
        for (id, score) in &vector_norm {
            *fused.entry(id.clone()).or_insert(0.0) += self.search_config.vector_weight * score;
        }
        for (id, score) in &bm25_norm {
            *fused.entry(id.clone()).or_insert(0.0) += self.search_config.bm25_weight * score;
        }

        let chunks = self.load_chunks()?;
        let by_id: HashMap<ChunkId, Chunk> = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();

        let mut best_per_key: HashMap<String, ScoredChunk> = HashMap::new();
        for (id, score) in fused {
            let Some(chunk) = by_id.get(&id).cloned() else { continue };
            let key = dedup_key(&chunk.text);
            let candidate = ScoredChunk { chunk, score, method: SearchMethod::Hybrid };
            best_per_key
                .entry(key)
                .and_modify(|existing| {
                    if candidate.score > existing.score {
                        *existing = candidate.clone();
                    }
                })
                .or_insert(candidate);
        }

        let mut results: Vec<ScoredChunk> = best_per_key.into_values().collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }

    // ---- conversations ----

    pub fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let bytes = bincode_encode(conversation)?;
        self.conversations.insert(conversation.id.as_bytes(), bytes)?;
        self.conversations.flush()?;
        self.conversation_cache.lock().put(conversation.id, conversation.clone());
        Ok(())
    }

    pub fn get_conversations(&self) -> Result<Vec<Conversation>> {
        let mut conversations = Vec::new();
        for entry in self.conversations.iter() {
            let (_, value) = entry?;
            conversations.push(bincode_decode::<Conversation>(&value)?);
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    pub fn update_conversation_title(&self, conversation_id: Uuid, title: &str) -> Result<()> {
        let key = conversation_id.as_bytes();
        let Some(bytes) = self.conversations.get(key)? else {
            return Err(RagError::store(format!("conversation {conversation_id} not found")));
        };
        let mut conversation: Conversation = bincode_decode(&bytes)?;
        conversation.title = title.to_string();
        conversation.updated_at = chrono::Utc::now();
        self.save_conversation(&conversation)
    }

    pub fn delete_conversation(&self, conversation_id: Uuid) -> Result<()> {
        self.conversations.remove(conversation_id.as_bytes())?;
        self.conversations.flush()?;
        self.conversation_cache.lock().pop(&conversation_id);

        let prefix = conversation_id.as_bytes().to_vec();
        let keys: Vec<Vec<u8>> = self
            .messages
            .scan_prefix(&prefix)
            .keys()
            .filter_map(|k| k.ok().map(|k| k.to_vec()))
            .collect();
        for key in keys {
            self.messages.remove(key)?;
        }
        self.messages.flush()?;
        Ok(())
    }

    pub fn save_message(&self, message: &Message) -> Result<()> {
        let mut key = message.conversation_id.as_bytes().to_vec();
        key.extend_from_slice(message.id.as_bytes());
        let bytes = bincode_encode(message)?;
        self.messages.insert(key, bytes)?;
        self.messages.flush()?;
        Ok(())
    }

    pub fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let prefix = conversation_id.as_bytes().to_vec();
        let mut messages = Vec::new();
        for entry in self.messages.scan_prefix(&prefix) {
            let (_, value) = entry?;
            messages.push(bincode_decode::<Message>(&value)?);
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    // ---- lifecycle ----

    /// Drops in-memory caches so the next read re-derives state from
    /// `sled`, used after a store operation returns a corrupt-state error.
    pub fn recover_from_error(&self) {
        *self.chunk_cache.write() = None;
        *self.bm25_cache.write() = None;
        self.conversation_cache.lock().clear();
    }

    pub fn clear(&self) -> Result<()> {
        self.chunks.clear()?;
        self.book_meta.clear()?;
        self.bm25_index.clear()?;
        self.conversations.clear()?;
        self.messages.clear()?;
        self.db.flush()?;
        self.recover_from_error();
        *self.indexing_state.write() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookHash, ChunkId, MessageRole};

    fn test_store() -> (Store, test_support::TempDir) {
        let tmp = test_support::TempDir::new();
        let store = Store::open(tmp.path(), BookHash("book1".to_string()), SearchConfig::default()).unwrap();
        (store, tmp)
    }

    fn chunk(id: &str, page: usize, text: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            id: ChunkId(id.to_string()),
            book_hash: BookHash("book1".to_string()),
            section_index: 0,
            ordinal: 0,
            text: text.to_string(),
            chapter_title: None,
            page,
            start_char: 0,
            end_char: text.len(),
            embedding,
        }
    }

    #[test]
    fn save_and_load_chunks_round_trips() {
        let (store, _tmp) = test_store();
        let chunks = vec![chunk("a", 1, "hello world", Some(vec![1.0, 0.0])), chunk("b", 2, "goodbye", None)];
        store.save_chunks(chunks.clone()).unwrap();
        let loaded = store.load_chunks().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn vector_search_respects_spoiler_filter() {
        let (store, _tmp) = test_store();
        store
            .save_chunks(vec![
                chunk("a", 1, "alpha", Some(vec![1.0, 0.0])),
                chunk("b", 5, "beta", Some(vec![1.0, 0.0])),
            ])
            .unwrap();
        let results = store.vector_search(&[1.0, 0.0], 10, Some(2)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, ChunkId("a".to_string()));
    }

    #[test]
    fn vector_search_skips_chunks_without_embeddings() {
        let (store, _tmp) = test_store();
        store.save_chunks(vec![chunk("a", 1, "alpha", None)]).unwrap();
        let results = store.vector_search(&[1.0, 0.0], 10, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn bm25_search_returns_empty_without_an_index() {
        let (store, _tmp) = test_store();
        store.save_chunks(vec![chunk("a", 1, "alpha", None)]).unwrap();
        let results = store.bm25_search("alpha", 10, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn bm25_search_finds_indexed_chunk() {
        let (store, _tmp) = test_store();
        store.save_chunks(vec![chunk("a", 1, "the dragon flew over the castle", None)]).unwrap();
        let mut engine = Bm25Engine::new();
        engine.upsert(&ChunkId("a".to_string()), "the dragon flew over the castle", None);
        store.save_bm25(&engine).unwrap();
        let results = store.bm25_search("dragon", 10, None).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn hybrid_search_dedups_overlapping_chunks_by_text_prefix() {
        let (store, _tmp) = test_store();
        let shared_text = "the dragon flew over the ancient castle walls at dusk".to_string();
        store
            .save_chunks(vec![
                chunk("a", 1, &shared_text, Some(vec![1.0, 0.0])),
                chunk("b", 1, &shared_text, Some(vec![0.9, 0.1])),
            ])
            .unwrap();
        let mut engine = Bm25Engine::new();
        engine.upsert(&ChunkId("a".to_string()), &shared_text, None);
        engine.upsert(&ChunkId("b".to_string()), &shared_text, None);
        store.save_bm25(&engine).unwrap();

        let results = store.hybrid_search(Some(&[1.0, 0.0]), "dragon", 10, None).unwrap();
        assert_eq!(results.len(), 1, "near-duplicate chunks should collapse to one result");
    }

    #[test]
    fn conversation_and_message_round_trip() {
        let (store, _tmp) = test_store();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            book_hash: BookHash("book1".to_string()),
            title: "Chapter discussion".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        store.save_conversation(&conversation).unwrap();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation.id,
            role: MessageRole::User,
            content: "What happens next?".to_string(),
            created_at: chrono::Utc::now(),
        };
        store.save_message(&message).unwrap();

        assert_eq!(store.get_conversations().unwrap().len(), 1);
        assert_eq!(store.get_messages(conversation.id).unwrap().len(), 1);

        store.delete_conversation(conversation.id).unwrap();
        assert!(store.get_conversations().unwrap().is_empty());
        assert!(store.get_messages(conversation.id).unwrap().is_empty());
    }

    #[test]
    fn indexing_state_is_discarded_on_clear() {
        let (store, _tmp) = test_store();
        assert!(store.indexing_state().is_none());
        store.set_indexing_state(crate::types::IndexingState {
            book_hash: BookHash("book1".to_string()),
            status: crate::types::IndexingStatus::InProgress,
            phase: crate::types::IndexingPhase::Chunking,
            current: 0,
            total: 1,
        });
        assert!(store.indexing_state().is_some());
        store.clear().unwrap();
        assert!(store.indexing_state().is_none());
    }
}
