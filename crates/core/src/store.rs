use crate::config::{StoreConfig, VectorStorage};
use crate::stores::{ClickHouseIndex, FlatIndex, PgVectorStore, SplitStore, SqliteStore};
use crate::traits::{MetadataStore, VectorIndex};
use crate::StoreError;
use std::sync::Arc;
use tracing::info;

/// The relational store and the vector index picked for this deployment.
/// Inline backends hand out the same object for both. Otherwise `metadata`
/// forwards chunk embeddings to `index` and never stores them in a row.
#[derive(Clone)]
pub struct Backend {
    pub storage: VectorStorage,
    pub metadata: Arc<dyn MetadataStore>,
    pub index: Arc<dyn VectorIndex>,
}

pub async fn open_backend(config: &StoreConfig) -> Result<Backend, StoreError> {
    config.validate()?;

    let backend = match config.storage {
        VectorStorage::Pgvector => {
            let store = Arc::new(
                PgVectorStore::connect(
                    &config.database_url,
                    config.vector_dim,
                    config.metric,
                    config.connect_timeout,
                )
                .await?,
            );
            Backend {
                storage: config.storage,
                metadata: store.clone(),
                index: store,
            }
        }
        VectorStorage::Sqlite => {
            let store = Arc::new(open_sqlite(config).await?);
            Backend {
                storage: config.storage,
                metadata: store.clone(),
                index: store,
            }
        }
        VectorStorage::Clickhouse => {
            let index = ClickHouseIndex::new(
                &config.clickhouse,
                config.vector_dim,
                config.metric,
                config.connect_timeout,
            )?;
            index.ensure_table().await?;
            split(config, Arc::new(index)).await?
        }
        VectorStorage::Faiss => {
            let path = config.faiss_index_path.clone().ok_or_else(|| {
                StoreError::InvalidConfig("faiss storage needs a sidecar index path".to_string())
            })?;
            let index = FlatIndex::open(path, config.vector_dim, config.metric).await?;
            split(config, Arc::new(index)).await?
        }
    };

    info!(
        storage = %config.storage,
        inline_vectors = config.storage.stores_inline(),
        vector_dim = config.vector_dim,
        "store backend ready"
    );
    Ok(backend)
}

/// SQLite keeps documents and chunks; every vector goes to `index`.
async fn split(config: &StoreConfig, index: Arc<dyn VectorIndex>) -> Result<Backend, StoreError> {
    let metadata = Arc::new(open_sqlite(config).await?);
    Ok(Backend {
        storage: config.storage,
        metadata: Arc::new(SplitStore::new(metadata, index.clone())),
        index,
    })
}

async fn open_sqlite(config: &StoreConfig) -> Result<SqliteStore, StoreError> {
    SqliteStore::connect(
        &config.database_url,
        config.vector_dim,
        config.metric,
        config.connect_timeout,
    )
    .await
}
