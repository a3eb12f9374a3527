pub mod chunking;
pub mod config;
pub mod distance;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod schema;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, chunk_by_paragraph, normalize_whitespace, ChunkingConfig};
pub use config::{ClickHouseConfig, StoreConfig, VectorStorage, DEFAULT_VECTOR_DIM};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, StoreError};
pub use ingest::{
    discover_text_files, ingest_file, ingest_folder_best_effort, IngestionReport, SkippedFile,
};
pub use models::{
    Chunk, DistanceMetric, Document, IngestionOptions, NewChunk, NewDocument, RetrievedChunk,
    RetrievedContext, VectorDbStats, VectorHit,
};
pub use orchestrator::{IngestedDocument, StoreCoordinator};
pub use store::{open_backend, Backend};
pub use stores::{ClickHouseIndex, FlatIndex, PgVectorStore, SplitStore, SqliteStore};
pub use traits::{ChunkStore, DocumentStore, MetadataStore, StatsTracker, VectorIndex};
