//! Cooperative cancellation token.
//!
//! Mirrors the `Arc<Mutex<bool>>` cancel flag in the teacher's
//! `indexing::IndexingState` (`crates/shodh-rag/src/indexing.rs`), trimmed
//! to a single flag: the teacher's pause/resume/folder-batch state machine
//! has no counterpart in spec.md, which only asks for an observe-at-every-
//! suspension-point cancel signal (spec §5).

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<Mutex<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }

    /// Observation point: call at every suspension point named in spec §5
    /// (before each section, before each embedding batch, before each
    /// persistence phase). Returns `Err(RagError::IndexingAborted)` if the
    /// token has been cancelled.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::RagError::IndexingAborted)
        } else {
            Ok(())
        }
    }
}
