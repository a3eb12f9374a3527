use crate::distance::check_vector;
use crate::models::{Chunk, Document, NewChunk, NewDocument, VectorDbStats};
use crate::stores::SqliteStore;
use crate::traits::{ChunkStore, DocumentStore, StatsTracker, VectorIndex};
use crate::StoreError;
use async_trait::async_trait;
use futures::stream::{BoxStream, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// SQLite metadata paired with an external vector index. Chunk rows never
/// carry an embedding; vectors handed in with a chunk go to the index under
/// the chunk's id, and deletes clear the index as well.
pub struct SplitStore {
    metadata: Arc<SqliteStore>,
    index: Arc<dyn VectorIndex>,
}

impl SplitStore {
    pub fn new(metadata: Arc<SqliteStore>, index: Arc<dyn VectorIndex>) -> Self {
        Self { metadata, index }
    }

    fn check_embeddings(&self, chunks: &[NewChunk]) -> Result<(), StoreError> {
        let dimensions = self.index.dimensions();
        chunks
            .iter()
            .filter_map(|chunk| chunk.embedding.as_deref())
            .try_for_each(|embedding| check_vector(dimensions, embedding))
    }

    async fn chunk_ids(&self, document_id: &str) -> Result<Vec<i64>, StoreError> {
        self.metadata
            .chunks_for_document(document_id)
            .map_ok(|chunk| chunk.id)
            .try_collect()
            .await
    }

    /// Inserts the rows, then indexes their vectors. An index failure removes
    /// the rows and any vectors already written.
    async fn store(
        &self,
        document_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>, StoreError> {
        self.check_embeddings(&chunks)?;

        let mut embeddings = Vec::with_capacity(chunks.len());
        let rows = chunks
            .into_iter()
            .map(|mut chunk| {
                embeddings.push(chunk.embedding.take());
                chunk
            })
            .collect::<Vec<_>>();

        let mut stored = self.metadata.add_chunks_batch(document_id, rows).await?;
        let chunk_ids = stored.iter().map(|chunk| chunk.id).collect::<Vec<_>>();

        let mut indexed = Vec::new();
        for (chunk, embedding) in stored.iter_mut().zip(embeddings) {
            let Some(embedding) = embedding else {
                continue;
            };
            if let Err(error) = self.index.upsert_embedding(chunk.id, &embedding).await {
                self.undo(document_id, &chunk_ids, &indexed).await;
                return Err(error);
            }
            indexed.push(chunk.id);
            chunk.embedding = Some(embedding);
        }

        Ok(stored)
    }

    async fn undo(&self, document_id: &str, chunk_ids: &[i64], indexed: &[i64]) {
        warn!(document_id, chunks = chunk_ids.len(), "index write failed, removing chunks");
        if let Err(error) = self.index.remove_embeddings(indexed).await {
            warn!(document_id, %error, "could not clear partial embeddings");
        }
        if let Err(error) = self.metadata.delete_chunks(chunk_ids).await {
            warn!(document_id, %error, "could not remove partial chunks");
        }
    }
}

#[async_trait]
impl DocumentStore for SplitStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document, StoreError> {
        self.metadata.create_document(document).await
    }

    async fn get_document(&self, id: &str) -> Result<Document, StoreError> {
        self.metadata.get_document(id).await
    }

    async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        let chunk_ids = self.chunk_ids(id).await?;
        self.metadata.delete_document(id).await?;
        self.index.remove_embeddings(&chunk_ids).await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        self.metadata.list_documents().await
    }

    async fn update_document_metadata(&self, id: &str, metadata: &str) -> Result<Document, StoreError> {
        self.metadata.update_document_metadata(id, metadata).await
    }
}

#[async_trait]
impl ChunkStore for SplitStore {
    async fn add_chunk(&self, document_id: &str, chunk: NewChunk) -> Result<Chunk, StoreError> {
        let mut stored = self.store(document_id, vec![chunk]).await?;
        stored
            .pop()
            .ok_or_else(|| StoreError::NotFound(format!("chunk for document {document_id}")))
    }

    async fn add_chunks_batch(
        &self,
        document_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>, StoreError> {
        let stored = self.store(document_id, chunks).await?;
        debug!(document_id, chunk_count = stored.len(), "chunks split across stores");
        Ok(stored)
    }

    fn chunks_for_document<'a>(
        &'a self,
        document_id: &'a str,
    ) -> BoxStream<'a, Result<Chunk, StoreError>> {
        self.metadata.chunks_for_document(document_id)
    }

    async fn get_chunk(&self, chunk_id: i64) -> Result<Chunk, StoreError> {
        self.metadata.get_chunk(chunk_id).await
    }

    async fn delete_chunks_for_document(&self, document_id: &str) -> Result<u64, StoreError> {
        let chunk_ids = self.chunk_ids(document_id).await?;
        let removed = self.metadata.delete_chunks_for_document(document_id).await?;
        self.index.remove_embeddings(&chunk_ids).await?;
        Ok(removed)
    }
}

#[async_trait]
impl StatsTracker for SplitStore {
    async fn increment_counts(&self, doc_delta: i64, chunk_delta: i64) -> Result<(), StoreError> {
        self.metadata.increment_counts(doc_delta, chunk_delta).await
    }

    async fn get_stats(&self) -> Result<VectorDbStats, StoreError> {
        self.metadata.get_stats().await
    }

    async fn reconcile_stats(&self) -> Result<VectorDbStats, StoreError> {
        self.metadata.reconcile_stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DistanceMetric, VectorHit};
    use crate::stores::FlatIndex;
    use tempfile::{tempdir, TempDir};

    /// Accepts `budget` writes, then reports the index as down.
    struct FailingIndex {
        inner: FlatIndex,
        budget: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for FailingIndex {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        async fn upsert_embedding(&self, chunk_id: i64, vector: &[f32]) -> Result<(), StoreError> {
            use std::sync::atomic::Ordering;
            let left = self.budget.load(Ordering::SeqCst);
            if left == 0 {
                return Err(StoreError::IndexUnavailable("down".to_string()));
            }
            self.budget.store(left - 1, Ordering::SeqCst);
            self.inner.upsert_embedding(chunk_id, vector).await
        }

        async fn remove_embeddings(&self, chunk_ids: &[i64]) -> Result<(), StoreError> {
            self.inner.remove_embeddings(chunk_ids).await
        }

        async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>, StoreError> {
            self.inner.search(query_vector, top_k).await
        }
    }

    async fn split_store(index: Arc<dyn VectorIndex>) -> (SplitStore, TempDir) {
        let dir = tempdir().unwrap();
        let sqlite = SqliteStore::open(&dir.path().join("rag.db"), 3, DistanceMetric::L2)
            .await
            .unwrap();
        let store = SplitStore::new(Arc::new(sqlite), index);
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn inline_embedding_goes_to_the_index() {
        let index = Arc::new(FlatIndex::in_memory(3, DistanceMetric::L2));
        let (store, _dir) = split_store(index.clone()).await;

        let chunk = store
            .add_chunk("doc1", NewChunk::new(0, "hello").with_embedding(vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(chunk.embedding, Some(vec![1.0, 0.0, 0.0]));

        let row = store.get_chunk(chunk.id).await.unwrap();
        assert_eq!(row.embedding, None);

        let hits = index.search(&[1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(hits, vec![VectorHit { chunk_id: chunk.id, distance: 0.0 }]);

        store.delete_document("doc1").await.unwrap();
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn bad_vector_is_rejected_before_any_row_is_written() {
        let index = Arc::new(FlatIndex::in_memory(3, DistanceMetric::L2));
        let (store, _dir) = split_store(index).await;

        let result = store
            .add_chunks_batch(
                "doc1",
                vec![
                    NewChunk::new(0, "ok").with_embedding(vec![1.0, 0.0, 0.0]),
                    NewChunk::new(1, "bad").with_embedding(vec![f32::NAN, 0.0, 0.0]),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::NonFiniteVector { index: 0, .. })));
        assert_eq!(store.get_stats().await.unwrap().chunks_count, 0);
    }

    #[tokio::test]
    async fn index_failure_rolls_back_the_batch() {
        let index = Arc::new(FailingIndex {
            inner: FlatIndex::in_memory(3, DistanceMetric::L2),
            budget: std::sync::atomic::AtomicUsize::new(1),
        });
        let (store, _dir) = split_store(index.clone()).await;

        let result = store
            .add_chunks_batch(
                "doc1",
                vec![
                    NewChunk::new(0, "a").with_embedding(vec![1.0, 0.0, 0.0]),
                    NewChunk::new(1, "b").with_embedding(vec![0.0, 1.0, 0.0]),
                ],
            )
            .await;
        assert!(matches!(result, Err(StoreError::IndexUnavailable(_))));

        assert!(store.chunk_ids("doc1").await.unwrap().is_empty());
        assert_eq!(store.get_stats().await.unwrap().chunks_count, 0);
        assert!(index.inner.is_empty().await);
    }
}
