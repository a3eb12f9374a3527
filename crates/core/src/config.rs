use crate::models::DistanceMetric;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_VECTOR_DIM: usize = 384;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which vector backend is active for a deployment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorStorage {
    Pgvector,
    Clickhouse,
    Faiss,
    #[default]
    Sqlite,
}

impl VectorStorage {
    pub fn as_str(self) -> &'static str {
        match self {
            VectorStorage::Pgvector => "pgvector",
            VectorStorage::Clickhouse => "clickhouse",
            VectorStorage::Faiss => "faiss",
            VectorStorage::Sqlite => "sqlite",
        }
    }

    /// Whether chunk rows carry their embedding in the relational store.
    pub fn stores_inline(self) -> bool {
        matches!(self, VectorStorage::Pgvector | VectorStorage::Sqlite)
    }
}

impl FromStr for VectorStorage {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pgvector" | "postgres" | "postgresql" => Ok(Self::Pgvector),
            "clickhouse" => Ok(Self::Clickhouse),
            "faiss" => Ok(Self::Faiss),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown VECTOR_STORAGE value: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for VectorStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickHouseConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            user: "default".to_string(),
            password: String::new(),
            database: "default".to_string(),
        }
    }
}

/// Injected store configuration. Nothing in the library picks a backend on
/// its own; everything comes through here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub storage: VectorStorage,
    /// SQLite or PostgreSQL connection string for documents, chunks and stats.
    pub database_url: String,
    pub vector_dim: usize,
    pub metric: DistanceMetric,
    pub connect_timeout: Duration,
    pub clickhouse: ClickHouseConfig,
    pub faiss_index_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage: VectorStorage::default(),
            database_url: "sqlite://ragstore.db".to_string(),
            vector_dim: DEFAULT_VECTOR_DIM,
            metric: DistanceMetric::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            clickhouse: ClickHouseConfig::default(),
            faiss_index_path: None,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.vector_dim == 0 {
            return Err(StoreError::InvalidConfig(
                "vector_dim must be greater than zero".to_string(),
            ));
        }

        let is_postgres = self.database_url.starts_with("postgres://")
            || self.database_url.starts_with("postgresql://");

        match self.storage {
            VectorStorage::Pgvector if !is_postgres => {
                return Err(StoreError::InvalidConfig(format!(
                    "pgvector storage needs a postgres database url, got {}",
                    self.database_url
                )));
            }
            VectorStorage::Sqlite | VectorStorage::Clickhouse | VectorStorage::Faiss
                if is_postgres =>
            {
                return Err(StoreError::InvalidConfig(format!(
                    "{} storage keeps documents in sqlite, got {}",
                    self.storage, self.database_url
                )));
            }
            VectorStorage::Clickhouse => {
                Url::parse(&self.clickhouse.url)?;
            }
            VectorStorage::Faiss if self.faiss_index_path.is_none() => {
                return Err(StoreError::InvalidConfig(
                    "faiss storage needs a sidecar index path".to_string(),
                ));
            }
            _ => {}
        }

        Ok(())
    }
}
