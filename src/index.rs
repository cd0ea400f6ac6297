//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is what the corpus and assembler see. It is
//! async so a remote ANN service can stand behind it. [`InMemoryIndex`] is
//! the per-session implementation: brute-force scoring over every stored
//! vector, which is plenty for a handful of uploaded files.

use async_trait::async_trait;
use std::sync::RwLock;

use crate::config::Metric;
use crate::embedding::{cosine_similarity, l2_distance};
use crate::error::RetrievalError;
use crate::models::{EmbeddedChunk, ScoredChunk};

/// Stores embedded chunks and answers k-nearest queries.
///
/// Scores returned by [`search`](VectorIndex::search) must be monotonic:
/// a higher score means a more similar chunk. Results are sorted by
/// descending score.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, chunks: Vec<EmbeddedChunk>) -> Result<(), RetrievalError>;

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError>;

    /// Drop every chunk that came from `source_id`.
    async fn remove_source(&self, source_id: &str) -> Result<(), RetrievalError>;

    async fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory brute-force index.
pub struct InMemoryIndex {
    metric: Metric,
    entries: RwLock<Vec<EmbeddedChunk>>,
}

impl InMemoryIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            entries: RwLock::new(Vec::new()),
        }
    }

    fn score(&self, query: &[f32], vector: &[f32]) -> f32 {
        match self.metric {
            Metric::Cosine => cosine_similarity(query, vector),
            Metric::L2 => 1.0 / (1.0 + l2_distance(query, vector)),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<EmbeddedChunk>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<EmbeddedChunk>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new(Metric::default())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, chunks: Vec<EmbeddedChunk>) -> Result<(), RetrievalError> {
        let mut entries = self.write();
        let expected = entries
            .first()
            .map(|e| e.vector.len())
            .or_else(|| chunks.first().map(|c| c.vector.len()));
        if let Some(dims) = expected {
            if let Some(bad) = chunks.iter().find(|c| c.vector.len() != dims) {
                return Err(RetrievalError::Unavailable(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    dims,
                    bad.vector.len()
                )));
            }
        }
        entries.extend(chunks);
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let entries = self.read();
        if let Some(first) = entries.first() {
            if first.vector.len() != query.len() {
                return Err(RetrievalError::Unavailable(format!(
                    "query dimension {} does not match index dimension {}",
                    query.len(),
                    first.vector.len()
                )));
            }
        }

        let mut hits: Vec<ScoredChunk> = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: self.score(query, &e.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
                .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn remove_source(&self, source_id: &str) -> Result<(), RetrievalError> {
        self.write().retain(|e| e.chunk.source_id != source_id);
        Ok(())
    }

    async fn clear(&self) {
        self.write().clear();
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}
