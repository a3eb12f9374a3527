//! Table definitions for the relational backends.

use crate::models::DistanceMetric;

/// SQLite schema. Timestamps are unix milliseconds; embeddings are JSON text.
pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    metadata TEXT NOT NULL DEFAULT '',
    file_path TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS document_chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    chunk_text TEXT NOT NULL,
    embedding TEXT,
    metadata TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    UNIQUE (document_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_document_chunks_document
    ON document_chunks(document_id, chunk_index);

CREATE TABLE IF NOT EXISTS vector_db_stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    documents_count INTEGER NOT NULL DEFAULT 0,
    chunks_count INTEGER NOT NULL DEFAULT 0,
    vector_dim INTEGER NOT NULL,
    last_modified INTEGER NOT NULL
);
"#;

/// PostgreSQL schema with the pgvector extension. The embedding column width
/// comes from the configured dimension.
pub fn postgres_schema(vector_dim: usize, metric: DistanceMetric) -> String {
    let ops = match metric {
        DistanceMetric::L2 => "vector_l2_ops",
        DistanceMetric::Cosine => "vector_cosine_ops",
    };

    format!(
        r#"
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    metadata TEXT NOT NULL DEFAULT '',
    file_path TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS document_chunks (
    id BIGSERIAL PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    chunk_index BIGINT NOT NULL,
    chunk_text TEXT NOT NULL,
    embedding vector({vector_dim}),
    metadata TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (document_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_document_chunks_embedding
    ON document_chunks USING hnsw (embedding {ops});

CREATE TABLE IF NOT EXISTS vector_db_stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    documents_count BIGINT NOT NULL DEFAULT 0,
    chunks_count BIGINT NOT NULL DEFAULT 0,
    vector_dim INTEGER NOT NULL,
    last_modified TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#
    )
}
