//! Lexical (BM25) search engine (spec §4.3).
//!
//! Ported from the retrieved `openai-codex` BM25 index
//! (`other_examples/.../retrieval-src-search-bm25_index.rs`): the `bm25`
//! crate's `Embedder`/`Scorer` pair, a `SparseEmbedding` persistence
//! shape, and a `load_with_contents`-style reload that re-embeds stored
//! text because `bm25::Scorer` itself is not serializable. Swapped the
//! example's `CodeTokenizer` for a non-stemming whitespace/punctuation
//! tokenizer, since spec §9 calls for "default stemmer disabled".

use std::collections::HashMap;

use bm25::{Embedder, EmbedderBuilder, Scorer, Tokenizer};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::types::ChunkId;

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTokenizer;

impl Tokenizer for PlainTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SparseEmbedding {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseEmbedding {
    fn from_bm25(embedding: &bm25::Embedding<u32>) -> Self {
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for term in embedding.iter() {
            indices.push(term.index);
            values.push(term.value);
        }
        Self { indices, values }
    }
}

/// Opaque-but-stable on-disk form of a book's BM25 index (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Bm25Blob {
    pub avgdl: f32,
    pub doc_count: usize,
    pub embeddings: HashMap<String, SparseEmbedding>,
    /// `(text, chapter_title)` per chunk id, kept so the scorer can be
    /// rebuilt by re-embedding on load.
    pub contents: HashMap<String, (String, Option<String>)>,
}

impl Bm25Blob {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RagError::store_with_source("failed to serialize bm25 index", e.into()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RagError::store_with_source("failed to parse bm25 index", e.into()))
    }
}

const DEFAULT_AVGDL: f32 = 100.0;

pub struct Bm25Engine {
    tokenizer: PlainTokenizer,
    embedder: Embedder<u32, PlainTokenizer>,
    scorer: Scorer<String, u32>,
    embeddings: HashMap<String, SparseEmbedding>,
    contents: HashMap<String, (String, Option<String>)>,
    avgdl: f32,
}

fn build_embedder(avgdl: f32) -> Embedder<u32, PlainTokenizer> {
    EmbedderBuilder::<u32, PlainTokenizer>::with_avgdl(avgdl)
        .tokenizer(PlainTokenizer)
        .build()
}

impl Bm25Engine {
    pub fn new() -> Self {
        Self {
            tokenizer: PlainTokenizer,
            embedder: build_embedder(DEFAULT_AVGDL),
            scorer: Scorer::new(),
            embeddings: HashMap::new(),
            contents: HashMap::new(),
            avgdl: DEFAULT_AVGDL,
        }
    }

    /// Rebuilds the scorer from a persisted blob by re-embedding every
    /// stored document, since `bm25::Scorer` can't be round-tripped
    /// directly.
    pub fn from_blob(blob: Bm25Blob) -> Self {
        let avgdl = if blob.doc_count > 0 { blob.avgdl } else { DEFAULT_AVGDL };
        let tokenizer = PlainTokenizer;
        let embedder = build_embedder(avgdl);
        let mut scorer = Scorer::new();

        for (id, (text, chapter_title)) in &blob.contents {
            let field = Self::indexed_field(text, chapter_title.as_deref());
            let embedding = embedder.embed(&field);
            scorer.upsert(id, embedding);
        }

        Self {
            tokenizer,
            embedder,
            scorer,
            embeddings: blob.embeddings,
            contents: blob.contents,
            avgdl,
        }
    }

    pub fn to_blob(&self) -> Bm25Blob {
        Bm25Blob {
            avgdl: self.avgdl,
            doc_count: self.embeddings.len(),
            embeddings: self.embeddings.clone(),
            contents: self.contents.clone(),
        }
    }

    /// Indexes `text` and `chapterTitle` together (spec §4.3: "the index
    /// fields are `text` and `chapterTitle`, keyed by `id`"), so a query
    /// matching only the chapter title is still found.
    fn indexed_field(text: &str, chapter_title: Option<&str>) -> String {
        match chapter_title {
            Some(title) if !title.is_empty() => format!("{title} {text}"),
            _ => text.to_string(),
        }
    }

    pub fn upsert(&mut self, id: &ChunkId, text: &str, chapter_title: Option<String>) {
        let field = Self::indexed_field(text, chapter_title.as_deref());
        let embedding = self.embedder.embed(&field);
        let sparse = SparseEmbedding::from_bm25(&embedding);
        self.scorer.upsert(&id.0, embedding);
        self.embeddings.insert(id.0.clone(), sparse);
        self.contents.insert(id.0.clone(), (text.to_string(), chapter_title));
    }

    /// `bm25::Scorer` has no removal API, so dropping chunks rebuilds the
    /// scorer from the remaining contents.
    pub fn remove_all(&mut self, ids: &[ChunkId]) {
        for id in ids {
            self.embeddings.remove(&id.0);
            self.contents.remove(&id.0);
        }
        let mut scorer = Scorer::new();
        for (id, (text, chapter_title)) in &self.contents {
            let field = Self::indexed_field(text, chapter_title.as_deref());
            scorer.upsert(id, self.embedder.embed(&field));
        }
        self.scorer = scorer;
    }

    pub fn recalculate_avgdl(&mut self) {
        if self.contents.is_empty() {
            return;
        }
        let total: usize = self
            .contents
            .values()
            .map(|(text, chapter_title)| {
                self.tokenizer
                    .tokenize(&Self::indexed_field(text, chapter_title.as_deref()))
                    .len()
            })
            .sum();
        self.avgdl = total as f32 / self.contents.len() as f32;
        self.embedder = build_embedder(self.avgdl);
    }

    pub fn doc_count(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `(chunk id, score)` pairs sorted by relevance, empty (not
    /// an error) when the query has no searchable terms.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(ChunkId, f32)> {
        if self.tokenizer.tokenize(query).is_empty() {
            return Vec::new();
        }
        let query_embedding = self.embedder.embed(query);
        self.scorer
            .matches(&query_embedding)
            .into_iter()
            .take(limit)
            .map(|m| (ChunkId(m.id), m.score))
            .collect()
    }
}

impl Default for Bm25Engine {
    fn default() -> Self {
        Self::new()
    }
}
