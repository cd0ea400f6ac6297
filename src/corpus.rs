//! Per-session document corpus.
//!
//! A [`Corpus`] owns the documents uploaded into one session together with
//! the vector index built over their chunks. Ingestion runs chunk, embed
//! (in batches), then index. When embedding fails the document is still
//! kept, so `full` context mode can use it, but it contributes nothing to
//! `smart` retrieval.

use std::sync::Arc;

use crate::chunk::Chunker;
use crate::config::CorpusPolicy;
use crate::embedding::{with_retries, Embedder};
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::models::{Document, EmbeddedChunk};

/// Outcome of [`Corpus::ingest`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReport {
    pub source_id: String,
    pub chunks: usize,
    /// Whether the chunks made it into the vector index.
    pub indexed: bool,
    /// Why indexing failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct Corpus {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    index: Box<dyn VectorIndex>,
    policy: CorpusPolicy,
    batch_size: usize,
    max_retries: u32,
    documents: Vec<Document>,
}

impl Corpus {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        index: Box<dyn VectorIndex>,
        policy: CorpusPolicy,
    ) -> Self {
        Self {
            chunker,
            embedder,
            index,
            policy,
            batch_size: 64,
            max_retries: 1,
            documents: Vec::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Add a document according to the corpus policy.
    ///
    /// Under `replace` every earlier document is dropped first. Under
    /// `append` a document with the same name as an earlier one replaces
    /// that one in place; otherwise it goes after the existing documents.
    pub async fn ingest(&mut self, document: Document) -> IngestReport {
        match self.policy {
            CorpusPolicy::Replace => self.clear().await,
            CorpusPolicy::Append => {
                if let Err(e) = self.index.remove_source(&document.source_id).await {
                    tracing::warn!(source = %document.source_id, error = %e, "failed to drop previous version");
                }
            }
        }

        let chunks = self.chunker.chunk(&document.source_id, &document.text);
        let chunk_count = chunks.len();
        let source_id = document.source_id.clone();

        match self.documents.iter_mut().find(|d| d.source_id == source_id) {
            Some(existing) => *existing = document,
            None => self.documents.push(document),
        }

        let outcome = if chunks.is_empty() {
            Ok(())
        } else {
            self.embed_and_index(chunks).await
        };

        match outcome {
            Ok(()) => {
                tracing::info!(source = %source_id, chunks = chunk_count, "document indexed");
                IngestReport {
                    source_id,
                    chunks: chunk_count,
                    indexed: true,
                    warning: None,
                }
            }
            Err(e) => {
                tracing::warn!(source = %source_id, error = %e, "document kept without index");
                if let Err(e) = self.index.remove_source(&source_id).await {
                    tracing::warn!(source = %source_id, error = %e, "failed to roll back partial index");
                }
                IngestReport {
                    source_id,
                    chunks: chunk_count,
                    indexed: false,
                    warning: Some(e.to_string()),
                }
            }
        }
    }

    async fn embed_and_index(
        &self,
        chunks: Vec<crate::models::DocumentChunk>,
    ) -> Result<(), RetrievalError> {
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedder = &self.embedder;
            let vectors = with_retries("embedding", self.max_retries, || embedder.embed(&texts)).await?;

            let embedded = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
                .collect();
            self.index.add(embedded).await?;
        }
        Ok(())
    }

    /// Drop every document and indexed chunk.
    pub async fn clear(&mut self) {
        self.documents.clear();
        self.index.clear().await;
    }

    /// Uploaded documents in upload order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }
}
