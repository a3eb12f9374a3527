use crate::distance::{check_vector, distance, format_vector, parse_vector, rank_hits};
use crate::models::{Chunk, DistanceMetric, Document, NewChunk, NewDocument, VectorDbStats, VectorHit};
use crate::schema::SQLITE_SCHEMA;
use crate::traits::{ChunkStore, DocumentStore, StatsTracker, VectorIndex};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Documents, chunks, inline JSON embeddings and the stats row in one SQLite
/// database.
pub struct SqliteStore {
    pool: SqlitePool,
    vector_dim: usize,
    metric: DistanceMetric,
}

impl SqliteStore {
    /// Open or create a database file at the given path.
    pub async fn open(
        path: &Path,
        vector_dim: usize,
        metric: DistanceMetric,
    ) -> Result<Self, StoreError> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        Self::connect(
            &format!("sqlite:{}", path.display()),
            vector_dim,
            metric,
            crate::config::DEFAULT_CONNECT_TIMEOUT,
        )
        .await
    }

    pub async fn connect(
        url: &str,
        vector_dim: usize,
        metric: DistanceMetric,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(connect_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(connect_timeout)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            vector_dim,
            metric,
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SQLITE_SCHEMA).execute(&self.pool).await?;

        sqlx::query(
            r#"
            INSERT INTO vector_db_stats (id, documents_count, chunks_count, vector_dim, last_modified)
            VALUES (1, 0, 0, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(self.vector_dim as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        let stored: i64 = sqlx::query_scalar("SELECT vector_dim FROM vector_db_stats WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        if stored as usize != self.vector_dim {
            return Err(StoreError::DimensionMismatch {
                expected: stored as usize,
                actual: self.vector_dim,
            });
        }

        Ok(())
    }

    /// Deletes the given chunk rows and adjusts the chunk counter.
    pub async fn delete_chunks(&self, chunk_ids: &[i64]) -> Result<u64, StoreError> {
        if chunk_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM document_chunks WHERE id IN (");
        let mut separated = builder.separated(", ");
        for chunk_id in chunk_ids {
            separated.push_bind(*chunk_id);
        }
        separated.push_unseparated(")");

        let mut tx = self.pool.begin().await?;
        let removed = builder.build().execute(&mut *tx).await?.rows_affected();
        if removed > 0 {
            bump_stats(&mut tx, 0, -(removed as i64)).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn insert_chunk(
        conn: &mut SqliteConnection,
        document_id: &str,
        chunk: NewChunk,
        created_at: DateTime<Utc>,
    ) -> Result<Chunk, StoreError> {
        let embedding = chunk.embedding.as_deref().map(format_vector);
        let result = sqlx::query(
            r#"
            INSERT INTO document_chunks
                (document_id, chunk_index, chunk_text, embedding, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.chunk_text)
        .bind(embedding)
        .bind(&chunk.metadata)
        .bind(created_at.timestamp_millis())
        .execute(&mut *conn)
        .await
        .map_err(|error| match StoreError::from(error) {
            StoreError::DuplicateKey(_) => StoreError::DuplicateKey(format!(
                "chunk ({document_id}, {})",
                chunk.chunk_index
            )),
            StoreError::ForeignKeyViolation(_) => {
                StoreError::ForeignKeyViolation(format!("document {document_id} does not exist"))
            }
            other => other,
        })?;

        Ok(Chunk {
            id: result.last_insert_rowid(),
            document_id: document_id.to_string(),
            chunk_index: chunk.chunk_index,
            chunk_text: chunk.chunk_text,
            embedding: chunk.embedding,
            metadata: chunk.metadata,
            created_at,
        })
    }

    async fn document_exists(&self, id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    fn check_embedding(&self, chunk: &NewChunk) -> Result<(), StoreError> {
        match &chunk.embedding {
            Some(embedding) => check_vector(self.vector_dim, embedding),
            None => Ok(()),
        }
    }
}

async fn bump_stats(
    conn: &mut SqliteConnection,
    doc_delta: i64,
    chunk_delta: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE vector_db_stats
        SET documents_count = documents_count + ?,
            chunks_count = chunks_count + ?,
            last_modified = ?
        WHERE id = 1
        "#,
    )
    .bind(doc_delta)
    .bind(chunk_delta)
    .bind(Utc::now().timestamp_millis())
    .execute(conn)
    .await?;
    Ok(())
}

fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    Ok(Document {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        metadata: row.try_get("metadata")?,
        file_path: row.try_get("file_path")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk, StoreError> {
    let embedding = row
        .try_get::<Option<String>, _>("embedding")?
        .map(|text| parse_vector(&text))
        .transpose()?;

    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        chunk_text: row.try_get("chunk_text")?,
        embedding,
        metadata: row.try_get("metadata")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn stats_from_row(row: &SqliteRow) -> Result<VectorDbStats, StoreError> {
    Ok(VectorDbStats {
        documents_count: row.try_get("documents_count")?,
        chunks_count: row.try_get("chunks_count")?,
        vector_dim: row.try_get::<i64, _>("vector_dim")? as usize,
        last_modified: from_millis(row.try_get("last_modified")?),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document, StoreError> {
        let id = document.resolved_id();
        let created_at = now_millis();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, name, description, metadata, file_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&document.name)
        .bind(&document.description)
        .bind(&document.metadata)
        .bind(&document.file_path)
        .bind(created_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(|error| match StoreError::from(error) {
            StoreError::DuplicateKey(_) => StoreError::DuplicateKey(format!("document {id}")),
            other => other,
        })?;
        bump_stats(&mut tx, 1, 0).await?;
        tx.commit().await?;

        debug!(document_id = %id, "document created");

        Ok(Document {
            id,
            name: document.name,
            description: document.description,
            metadata: document.metadata,
            file_path: document.file_path,
            created_at,
        })
    }

    async fn get_document(&self, id: &str) -> Result<Document, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))?;
        document_from_row(&row)
    }

    async fn delete_document(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let chunks = sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let documents = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if documents == 0 && chunks == 0 {
            return Ok(());
        }

        bump_stats(&mut tx, -(documents as i64), -(chunks as i64)).await?;
        tx.commit().await?;

        debug!(document_id = %id, chunks, "document deleted");
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn update_document_metadata(&self, id: &str, metadata: &str) -> Result<Document, StoreError> {
        let updated = sqlx::query("UPDATE documents SET metadata = ? WHERE id = ?")
            .bind(metadata)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(format!("document {id}")));
        }
        self.get_document(id).await
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn add_chunk(&self, document_id: &str, chunk: NewChunk) -> Result<Chunk, StoreError> {
        self.check_embedding(&chunk)?;

        let mut tx = self.pool.begin().await?;
        let stored = Self::insert_chunk(&mut tx, document_id, chunk, now_millis()).await?;
        bump_stats(&mut tx, 0, 1).await?;
        tx.commit().await?;

        Ok(stored)
    }

    async fn add_chunks_batch(
        &self,
        document_id: &str,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>, StoreError> {
        for chunk in &chunks {
            self.check_embedding(chunk)?;
        }

        if chunks.is_empty() {
            if !self.document_exists(document_id).await? {
                return Err(StoreError::ForeignKeyViolation(format!(
                    "document {document_id} does not exist"
                )));
            }
            return Ok(Vec::new());
        }

        let created_at = now_millis();
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            // An error here drops the transaction, rolling back the whole batch.
            stored.push(Self::insert_chunk(&mut tx, document_id, chunk, created_at).await?);
        }
        bump_stats(&mut tx, 0, stored.len() as i64).await?;
        tx.commit().await?;

        debug!(document_id, chunk_count = stored.len(), "chunk batch stored");
        Ok(stored)
    }

    fn chunks_for_document<'a>(
        &'a self,
        document_id: &'a str,
    ) -> BoxStream<'a, Result<Chunk, StoreError>> {
        sqlx::query(
            "SELECT id, document_id, chunk_index, chunk_text, embedding, metadata, created_at \
             FROM document_chunks WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch(&self.pool)
        .map(|row| row.map_err(StoreError::from).and_then(|row| chunk_from_row(&row)))
        .boxed()
    }

    async fn get_chunk(&self, chunk_id: i64) -> Result<Chunk, StoreError> {
        let row = sqlx::query(
            "SELECT id, document_id, chunk_index, chunk_text, embedding, metadata, created_at \
             FROM document_chunks WHERE id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("chunk {chunk_id}")))?;
        chunk_from_row(&row)
    }

    async fn delete_chunks_for_document(&self, document_id: &str) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed > 0 {
            bump_stats(&mut tx, 0, -(removed as i64)).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }
}

#[async_trait]
impl StatsTracker for SqliteStore {
    async fn increment_counts(&self, doc_delta: i64, chunk_delta: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        bump_stats(&mut conn, doc_delta, chunk_delta).await
    }

    async fn get_stats(&self) -> Result<VectorDbStats, StoreError> {
        let row = sqlx::query("SELECT * FROM vector_db_stats WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        stats_from_row(&row)
    }

    async fn reconcile_stats(&self) -> Result<VectorDbStats, StoreError> {
        sqlx::query(
            r#"
            UPDATE vector_db_stats
            SET documents_count = (SELECT COUNT(*) FROM documents),
                chunks_count = (SELECT COUNT(*) FROM document_chunks),
                last_modified = ?
            WHERE id = 1
            "#,
        )
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        self.get_stats().await
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    fn dimensions(&self) -> usize {
        self.vector_dim
    }

    async fn upsert_embedding(&self, chunk_id: i64, vector: &[f32]) -> Result<(), StoreError> {
        check_vector(self.vector_dim, vector)?;

        let updated = sqlx::query("UPDATE document_chunks SET embedding = ? WHERE id = ?")
            .bind(format_vector(vector))
            .bind(chunk_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound(format!("chunk {chunk_id}")));
        }
        Ok(())
    }

    async fn remove_embeddings(&self, chunk_ids: &[i64]) -> Result<(), StoreError> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE document_chunks SET embedding = NULL WHERE id IN (");
        let mut separated = builder.separated(", ");
        for chunk_id in chunk_ids {
            separated.push_bind(*chunk_id);
        }
        separated.push_unseparated(")");
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>, StoreError> {
        check_vector(self.vector_dim, query_vector)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let metric = self.metric;
        let hits = sqlx::query("SELECT id, embedding FROM document_chunks WHERE embedding IS NOT NULL")
            .fetch(&self.pool)
            .map_err(|error| StoreError::from(error).into_unavailable())
            .and_then(|row| async move {
                let embedding = parse_vector(row.try_get::<&str, _>("embedding")?)?;
                Ok::<_, StoreError>(VectorHit {
                    chunk_id: row.try_get("id")?,
                    distance: distance(metric, query_vector, &embedding),
                })
            })
            .try_collect::<Vec<_>>()
            .await?;

        Ok(rank_hits(hits, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    async fn open_store(dim: usize) -> (SqliteStore, TempDir) {
        let dir = tempdir().expect("tempdir");
        let store = SqliteStore::open(&dir.path().join("store.db"), dim, DistanceMetric::L2)
            .await
            .expect("open store");
        (store, dir)
    }

    async fn chunk_texts(store: &SqliteStore, document_id: &str) -> Vec<String> {
        store
            .chunks_for_document(document_id)
            .map_ok(|chunk| chunk.chunk_text)
            .try_collect()
            .await
            .expect("stream chunks")
    }

    #[tokio::test]
    async fn document_round_trips_all_fields() {
        let (store, _dir) = open_store(3).await;
        let input = NewDocument {
            id: Some("doc1".to_string()),
            name: "Test".to_string(),
            description: "a description".to_string(),
            metadata: r#"{"source":"upload"}"#.to_string(),
            file_path: "/tmp/a.txt".to_string(),
        };

        let created = store.create_document(input).await.expect("create");
        let fetched = store.get_document("doc1").await.expect("get");

        assert_eq!(fetched, created);
        assert_eq!(fetched.name, "Test");
        assert_eq!(fetched.metadata, r#"{"source":"upload"}"#);
        assert_eq!(fetched.file_path, "/tmp/a.txt");
    }

    #[tokio::test]
    async fn duplicate_document_id_is_rejected() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("first create");

        let second = store
            .create_document(NewDocument::new("Other", "/tmp/b.txt").with_id("doc1"))
            .await;
        assert!(matches!(second, Err(StoreError::DuplicateKey(_))));
        assert_eq!(store.get_stats().await.expect("stats").documents_count, 1);
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let (store, _dir) = open_store(3).await;
        let result = store.get_document("nope").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn chunks_stream_in_index_order_and_cascade_on_delete() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");

        store.add_chunk("doc1", NewChunk::new(1, "world")).await.expect("chunk 1");
        store.add_chunk("doc1", NewChunk::new(0, "hello")).await.expect("chunk 0");

        assert_eq!(chunk_texts(&store, "doc1").await, vec!["hello", "world"]);
        // A second pass restarts from the beginning.
        assert_eq!(chunk_texts(&store, "doc1").await, vec!["hello", "world"]);

        store.delete_document("doc1").await.expect("delete");
        assert!(chunk_texts(&store, "doc1").await.is_empty());

        let stats = store.get_stats().await.expect("stats");
        assert_eq!(stats.documents_count, 0);
        assert_eq!(stats.chunks_count, 0);
    }

    #[tokio::test]
    async fn deleting_absent_document_is_a_no_op() {
        let (store, _dir) = open_store(3).await;
        store.delete_document("ghost").await.expect("no-op delete");
        assert_eq!(store.get_stats().await.expect("stats").documents_count, 0);
    }

    #[tokio::test]
    async fn duplicate_chunk_index_is_rejected() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");

        store.add_chunk("doc1", NewChunk::new(0, "hello")).await.expect("first");
        let second = store.add_chunk("doc1", NewChunk::new(0, "again")).await;
        assert!(matches!(second, Err(StoreError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn chunk_for_unknown_document_violates_foreign_key() {
        let (store, _dir) = open_store(3).await;
        let result = store.add_chunk("missing", NewChunk::new(0, "hello")).await;
        assert!(matches!(result, Err(StoreError::ForeignKeyViolation(_))));

        let batch = store.add_chunks_batch("missing", Vec::new()).await;
        assert!(matches!(batch, Err(StoreError::ForeignKeyViolation(_))));
    }

    #[tokio::test]
    async fn failed_batch_stores_nothing() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");

        let batch = vec![
            NewChunk::new(0, "first"),
            NewChunk::new(1, "second"),
            NewChunk::new(1, "collides"),
        ];
        let result = store.add_chunks_batch("doc1", batch).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_))));

        assert!(chunk_texts(&store, "doc1").await.is_empty());
        assert_eq!(store.get_stats().await.expect("stats").chunks_count, 0);
    }

    #[tokio::test]
    async fn batch_with_wrong_dimension_is_rejected_up_front() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");

        let batch = vec![
            NewChunk::new(0, "ok").with_embedding(vec![1.0, 0.0, 0.0]),
            NewChunk::new(1, "bad").with_embedding(vec![1.0, 0.0]),
        ];
        let result = store.add_chunks_batch("doc1", batch).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn delete_chunks_keeps_document_and_updates_stats() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");
        store
            .add_chunks_batch("doc1", vec![NewChunk::new(0, "a"), NewChunk::new(1, "b")])
            .await
            .expect("batch");

        let removed = store.delete_chunks_for_document("doc1").await.expect("delete chunks");
        assert_eq!(removed, 2);
        assert!(store.get_document("doc1").await.is_ok());

        let stats = store.get_stats().await.expect("stats");
        assert_eq!(stats.documents_count, 1);
        assert_eq!(stats.chunks_count, 0);
    }

    #[tokio::test]
    async fn metadata_is_the_only_editable_field() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");

        let updated = store
            .update_document_metadata("doc1", r#"{"tag":"x"}"#)
            .await
            .expect("update");
        assert_eq!(updated.metadata, r#"{"tag":"x"}"#);
        assert_eq!(updated.name, "Test");

        let missing = store.update_document_metadata("ghost", "{}").await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn stored_embedding_retrieves_itself() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");

        let chunks = store
            .add_chunks_batch(
                "doc1",
                vec![
                    NewChunk::new(0, "x").with_embedding(vec![1.0, 0.0, 0.0]),
                    NewChunk::new(1, "y").with_embedding(vec![0.0, 1.0, 0.0]),
                    NewChunk::new(2, "z").with_embedding(vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .expect("batch");

        for chunk in &chunks {
            let embedding = chunk.embedding.as_ref().expect("embedding");
            let hits = store.search(embedding, 1).await.expect("search");
            assert_eq!(hits[0].chunk_id, chunk.id);
            assert_eq!(hits[0].distance, 0.0);
        }

        let fetched = store.get_chunk(chunks[1].id).await.expect("get chunk");
        assert_eq!(fetched.embedding, Some(vec![0.0, 1.0, 0.0]));
    }

    #[tokio::test]
    async fn upsert_embedding_replaces_vector() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");
        let chunk = store.add_chunk("doc1", NewChunk::new(0, "x")).await.expect("chunk");

        assert!(store.search(&[1.0, 0.0, 0.0], 5).await.expect("search").is_empty());

        store.upsert_embedding(chunk.id, &[1.0, 0.0, 0.0]).await.expect("upsert");
        let hits = store.search(&[1.0, 0.0, 0.0], 5).await.expect("search");
        assert_eq!(hits, vec![VectorHit { chunk_id: chunk.id, distance: 0.0 }]);

        let wrong = store.upsert_embedding(chunk.id, &[1.0]).await;
        assert!(matches!(wrong, Err(StoreError::DimensionMismatch { .. })));

        let unknown = store.upsert_embedding(9_999, &[1.0, 0.0, 0.0]).await;
        assert!(matches!(unknown, Err(StoreError::NotFound(_))));

        store.remove_embeddings(&[chunk.id]).await.expect("remove");
        assert!(store.search(&[1.0, 0.0, 0.0], 5).await.expect("search").is_empty());
    }

    #[tokio::test]
    async fn reopening_with_other_dimension_fails() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.db");
        let store = SqliteStore::open(&path, 384, DistanceMetric::L2).await.expect("open");
        store.close().await;

        let reopened = SqliteStore::open(&path, 768, DistanceMetric::L2).await;
        assert!(matches!(
            reopened,
            Err(StoreError::DimensionMismatch { expected: 384, actual: 768 })
        ));
    }

    #[tokio::test]
    async fn concurrent_increments_sum_up() {
        let (store, _dir) = open_store(3).await;
        let store = Arc::new(store);

        let deltas = [(1, 10), (2, -3), (-1, 4), (3, 0), (0, 7)];
        let mut tasks = Vec::new();
        for (doc_delta, chunk_delta) in deltas {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.increment_counts(doc_delta, chunk_delta).await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("increment");
        }

        let stats = store.get_stats().await.expect("stats");
        assert_eq!(stats.documents_count, 5);
        assert_eq!(stats.chunks_count, 18);
        assert_eq!(stats.vector_dim, 3);
    }

    #[tokio::test]
    async fn reconcile_repairs_drifted_counters() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");
        store.add_chunk("doc1", NewChunk::new(0, "a")).await.expect("chunk");
        store.increment_counts(5, 5).await.expect("drift");

        let stats = store.reconcile_stats().await.expect("reconcile");
        assert_eq!(stats.documents_count, 1);
        assert_eq!(stats.chunks_count, 1);
    }

    #[tokio::test]
    async fn non_finite_vectors_never_reach_the_table() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");
        let good = store
            .add_chunk("doc1", NewChunk::new(0, "good").with_embedding(vec![1.0, 0.0, 0.0]))
            .await
            .expect("good chunk");
        let plain = store.add_chunk("doc1", NewChunk::new(1, "plain")).await.expect("plain chunk");

        let upsert = store.upsert_embedding(plain.id, &[f32::INFINITY, 0.0, 0.0]).await;
        assert!(matches!(upsert, Err(StoreError::NonFiniteVector { index: 0, .. })));

        let add = store
            .add_chunk("doc1", NewChunk::new(2, "nan").with_embedding(vec![0.0, f32::NAN, 0.0]))
            .await;
        assert!(matches!(add, Err(StoreError::NonFiniteVector { index: 1, .. })));

        let batch = store
            .add_chunks_batch(
                "doc1",
                vec![NewChunk::new(3, "inf").with_embedding(vec![0.0, 0.0, f32::NEG_INFINITY])],
            )
            .await;
        assert!(matches!(batch, Err(StoreError::NonFiniteVector { index: 2, .. })));

        let query = store.search(&[f32::NAN, 0.0, 0.0], 1).await;
        assert!(matches!(query, Err(StoreError::NonFiniteVector { .. })));

        let hits = store.search(&[1.0, 0.0, 0.0], 1).await.expect("search");
        assert_eq!(hits, vec![VectorHit { chunk_id: good.id, distance: 0.0 }]);
        assert_eq!(chunk_texts(&store, "doc1").await, vec!["good", "plain"]);
    }

    #[tokio::test]
    async fn overlapping_concurrent_batches_keep_chunk_indexes_unique() {
        let (store, _dir) = open_store(3).await;
        store
            .create_document(NewDocument::new("Test", "/tmp/a.txt").with_id("doc1"))
            .await
            .expect("create");
        let store = Arc::new(store);

        let first = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let batch = (0..3).map(|index| NewChunk::new(index, format!("a{index}"))).collect();
                store.add_chunks_batch("doc1", batch).await
            })
        };
        let second = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let batch = (2..5).map(|index| NewChunk::new(index, format!("b{index}"))).collect();
                store.add_chunks_batch("doc1", batch).await
            })
        };

        let results = [
            first.await.expect("join first"),
            second.await.expect("join second"),
        ];
        let succeeded = results.iter().filter(|result| result.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|result| matches!(result, Err(StoreError::DuplicateKey(_))))
            .count();
        assert_eq!(succeeded, 1);
        assert_eq!(duplicates, 1);

        let texts = chunk_texts(&store, "doc1").await;
        assert_eq!(texts.len(), 3);
        let stats = store.get_stats().await.expect("stats");
        assert_eq!(stats.chunks_count, texts.len() as i64);
    }
}
