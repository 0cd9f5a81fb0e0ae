//! Structured error kinds for the RAG core (spec §7).
//!
//! Modeled on `LocalApiError`/`LocalApiErrorKind` from the retrieved
//! `hjinco-mdit` pack repo: a `thiserror`-derived enum paired with a
//! coarse `kind()` discriminant callers can match on without enumerating
//! every variant.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cooperative cancellation; not retried, surfaced as a no-op.
    Aborted,
    /// Embedding transport/provider failure; retried per policy.
    Embedding,
    /// Persistence failure.
    Store,
    /// BM25 query failed to parse.
    InvalidQuery,
    /// Missing API key / base URL / malformed config.
    Config,
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("indexing aborted by cancellation")]
    IndexingAborted,

    #[error("embedding provider failed: {message}")]
    EmbeddingError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("store operation failed: {message}")]
    StoreError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("configuration error: {message}")]
    ConfigError { message: String },
}

impl RagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexingAborted => ErrorKind::Aborted,
            Self::EmbeddingError { .. } => ErrorKind::Embedding,
            Self::StoreError { .. } => ErrorKind::Store,
            Self::InvalidQuery { .. } => ErrorKind::InvalidQuery,
            Self::ConfigError { .. } => ErrorKind::Config,
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingError {
            message: message.into(),
            source: None,
        }
    }

    pub fn embedding_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::EmbeddingError {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreError {
            message: message.into(),
            source: None,
        }
    }

    pub fn store_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::StoreError {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Non-retryable kinds per spec §7 propagation policy: authentication,
    /// quota, and cancellation short-circuit the retry loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Aborted | ErrorKind::Config)
    }
}

impl From<sled::Error> for RagError {
    fn from(e: sled::Error) -> Self {
        RagError::store_with_source("sled transaction failed", e.into())
    }
}
