use crate::chunking::build_chunks;
use crate::embeddings::Embedder;
use crate::models::{
    Chunk, Document, IngestionOptions, NewChunk, NewDocument, RetrievedChunk, RetrievedContext,
    VectorDbStats,
};
use crate::store::Backend;
use crate::traits::{MetadataStore, VectorIndex};
use crate::{IngestError, StoreError};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

/// Ties the relational store, the vector index and the embedder together so
/// callers never touch a backend directly.
pub struct StoreCoordinator {
    metadata: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    options: IngestionOptions,
}

impl StoreCoordinator {
    pub fn new(backend: Backend, embedder: Arc<dyn Embedder>) -> Result<Self, StoreError> {
        Self::from_parts(backend.metadata, backend.index, embedder)
    }

    /// `metadata` stores each chunk's embedding together with the chunk, in
    /// `index` or inline, as the stores built by `open_backend` do.
    pub fn from_parts(
        metadata: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, StoreError> {
        if embedder.dimensions() != index.dimensions() {
            return Err(StoreError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            });
        }

        Ok(Self {
            metadata,
            index,
            embedder,
            options: IngestionOptions::default(),
        })
    }

    pub fn with_options(mut self, options: IngestionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub fn metadata(&self) -> &dyn MetadataStore {
        self.metadata.as_ref()
    }

    /// Creates the document, stores its chunks and indexes their embeddings.
    /// Any failure after the document row exists removes it again.
    pub async fn ingest_text(
        &self,
        document: NewDocument,
        text: &str,
    ) -> Result<IngestedDocument, IngestError> {
        let pieces = self.embed(build_chunks(text, &self.options)?);
        let document = self.metadata.create_document(document).await?;

        match self.metadata.add_chunks_batch(&document.id, pieces).await {
            Ok(chunks) => {
                info!(
                    document_id = %document.id,
                    chunk_count = chunks.len(),
                    "document ingested"
                );
                Ok(IngestedDocument { document, chunks })
            }
            Err(error) => {
                warn!(document_id = %document.id, %error, "ingestion failed, removing document");
                if let Err(cleanup) = self.delete_document(&document.id).await {
                    warn!(document_id = %document.id, error = %cleanup, "cleanup failed");
                }
                Err(error.into())
            }
        }
    }

    /// Replaces a document's chunks and embeddings with ones built from `text`.
    /// Embeddings are computed before anything is removed. If the new batch
    /// fails to store, the document is left with no chunks rather than a
    /// partial set.
    pub async fn reindex_document(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<Vec<Chunk>, IngestError> {
        self.metadata.get_document(document_id).await?;
        let pieces = self.embed(build_chunks(text, &self.options)?);

        let removed = self.metadata.delete_chunks_for_document(document_id).await?;
        let chunks = match self.metadata.add_chunks_batch(document_id, pieces).await {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(document_id, removed, %error, "reindex failed, document has no chunks");
                return Err(error.into());
            }
        };

        debug!(document_id, removed, added = chunks.len(), "document reindexed");
        Ok(chunks)
    }

    fn embed(&self, pieces: Vec<NewChunk>) -> Vec<NewChunk> {
        pieces
            .into_iter()
            .map(|piece| {
                let embedding = self.embedder.embed(&piece.chunk_text);
                piece.with_embedding(embedding)
            })
            .collect()
    }

    /// Deletes the document, its chunks and their embeddings. Absent ids are
    /// a no-op.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        self.metadata.delete_document(document_id).await
    }

    pub async fn update_document_metadata(
        &self,
        document_id: &str,
        metadata: &str,
    ) -> Result<Document, StoreError> {
        self.metadata
            .update_document_metadata(document_id, metadata)
            .await
    }

    /// Nearest chunks for `query`. An unreachable index yields an empty,
    /// degraded context instead of an error.
    pub async fn retrieve_context(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<RetrievedContext, StoreError> {
        if query.trim().is_empty() {
            return Ok(RetrievedContext {
                query: query.to_string(),
                ..Default::default()
            });
        }

        let query_vector = self.embedder.embed(query);
        let hits = match self.index.search(&query_vector, top_k).await {
            Ok(hits) => hits,
            Err(StoreError::IndexUnavailable(reason)) => {
                warn!(%reason, "vector index unavailable, answering without context");
                return Ok(RetrievedContext {
                    query: query.to_string(),
                    chunks: Vec::new(),
                    degraded: true,
                });
            }
            Err(error) => return Err(error),
        };

        let mut chunks = Vec::with_capacity(hits.len());
        for hit in hits {
            match self.metadata.get_chunk(hit.chunk_id).await {
                Ok(chunk) => chunks.push(RetrievedChunk {
                    chunk_id: chunk.id,
                    document_id: chunk.document_id,
                    chunk_index: chunk.chunk_index,
                    distance: hit.distance,
                    text: chunk.chunk_text,
                }),
                Err(StoreError::NotFound(_)) => {
                    debug!(chunk_id = hit.chunk_id, "index hit without chunk row, skipping");
                }
                Err(error) => return Err(error),
            }
        }

        Ok(RetrievedContext {
            query: query.to_string(),
            chunks,
            degraded: false,
        })
    }

    pub async fn stats(&self) -> Result<VectorDbStats, StoreError> {
        self.metadata.get_stats().await
    }

    pub async fn reconcile_stats(&self) -> Result<VectorDbStats, StoreError> {
        self.metadata.reconcile_stats().await
    }
}
