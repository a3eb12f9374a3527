use crate::models::{Chunk, Document, NewChunk, NewDocument, VectorDbStats, VectorHit};
use crate::StoreError;
use async_trait::async_trait;
use futures::stream::BoxStream;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fails with `DuplicateKey` when the id is already taken.
    async fn create_document(&self, document: NewDocument) -> Result<Document, StoreError>;

    async fn get_document(&self, id: &str) -> Result<Document, StoreError>;

    /// Removes the document and all of its chunks. Absent ids are a no-op.
    async fn delete_document(&self, id: &str) -> Result<(), StoreError>;

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError>;

    async fn update_document_metadata(&self, id: &str, metadata: &str) -> Result<Document, StoreError>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn add_chunk(&self, document_id: &str, chunk: NewChunk) -> Result<Chunk, StoreError>;

    /// All-or-nothing: either every chunk is stored or none is.
    async fn add_chunks_batch(
        &self,
        document_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>, StoreError>;

    /// Lazily streams the document's chunks ordered by `chunk_index`. Every
    /// call starts a fresh query.
    fn chunks_for_document<'a>(
        &'a self,
        document_id: &'a str,
    ) -> BoxStream<'a, Result<Chunk, StoreError>>;

    async fn get_chunk(&self, chunk_id: i64) -> Result<Chunk, StoreError>;

    /// Returns the number of chunks removed.
    async fn delete_chunks_for_document(&self, document_id: &str) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait StatsTracker: Send + Sync {
    async fn increment_counts(&self, doc_delta: i64, chunk_delta: i64) -> Result<(), StoreError>;

    async fn get_stats(&self) -> Result<VectorDbStats, StoreError>;

    /// Recomputes the counters from the document and chunk tables.
    async fn reconcile_stats(&self) -> Result<VectorDbStats, StoreError>;
}

/// Relational backends hold documents, chunks and the stats row together.
pub trait MetadataStore: DocumentStore + ChunkStore + StatsTracker {}

impl<T> MetadataStore for T where T: DocumentStore + ChunkStore + StatsTracker {}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Fails with `DimensionMismatch` unless `vector.len() == dimensions()`.
    async fn upsert_embedding(&self, chunk_id: i64, vector: &[f32]) -> Result<(), StoreError>;

    async fn remove_embeddings(&self, chunk_ids: &[i64]) -> Result<(), StoreError>;

    /// Nearest chunks ascending by distance, ties by ascending chunk id.
    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>, StoreError>;
}
