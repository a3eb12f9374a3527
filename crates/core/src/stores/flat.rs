use crate::distance::{check_vector, distance, rank_hits};
use crate::models::{DistanceMetric, VectorHit};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

type Vectors = BTreeMap<i64, Vec<f32>>;

#[derive(Debug, Default, Deserialize)]
struct Sidecar {
    dimensions: usize,
    vectors: Vectors,
}

#[derive(Serialize)]
struct SidecarRef<'a> {
    dimensions: usize,
    vectors: &'a Vectors,
}

/// Exact nearest-neighbour index kept beside the relational store, in the
/// role a flat FAISS index plays. Vectors are held in memory and written back
/// to a JSON file after every change.
pub struct FlatIndex {
    path: Option<PathBuf>,
    vector_size: usize,
    metric: DistanceMetric,
    vectors: RwLock<Vectors>,
}

impl FlatIndex {
    /// In-memory only, nothing is persisted.
    pub fn in_memory(vector_size: usize, metric: DistanceMetric) -> Self {
        Self {
            path: None,
            vector_size,
            metric,
            vectors: RwLock::new(BTreeMap::new()),
        }
    }

    /// Loads the sidecar at `path`, or starts empty when the file is missing.
    pub async fn open(
        path: impl Into<PathBuf>,
        vector_size: usize,
        metric: DistanceMetric,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let vectors = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let sidecar: Sidecar = serde_json::from_slice(&bytes)?;
                if sidecar.dimensions != vector_size {
                    return Err(StoreError::DimensionMismatch {
                        expected: sidecar.dimensions,
                        actual: vector_size,
                    });
                }
                sidecar.vectors
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(StoreError::IndexUnavailable(error.to_string())),
        };

        debug!(path = %path.display(), vectors = vectors.len(), "flat index loaded");

        Ok(Self {
            path: Some(path),
            vector_size,
            metric,
            vectors: RwLock::new(vectors),
        })
    }

    pub async fn len(&self) -> usize {
        self.vectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.vectors.read().await.is_empty()
    }

    async fn persist(&self, vectors: &Vectors) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec(&SidecarRef {
            dimensions: self.vector_size,
            vectors,
        })?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("tmp");
        let written = match tokio::fs::write(&staging, bytes).await {
            Ok(()) => tokio::fs::rename(&staging, path).await,
            Err(error) => Err(error),
        };
        written.map_err(|error| {
            warn!(path = %path.display(), %error, "flat index write failed");
            StoreError::from(error)
        })
    }

    /// Applies `change` to a copy of the vectors, writes the copy out and
    /// only then makes it visible. A failed write leaves memory untouched.
    async fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vectors) -> bool + Send,
    {
        let mut vectors = self.vectors.write().await;
        let mut next = vectors.clone();
        if !change(&mut next) {
            return Ok(());
        }
        self.persist(&next).await?;
        *vectors = next;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.vector_size
    }

    async fn upsert_embedding(&self, chunk_id: i64, vector: &[f32]) -> Result<(), StoreError> {
        check_vector(self.vector_size, vector)?;
        self.update(|vectors| {
            vectors.insert(chunk_id, vector.to_vec());
            true
        })
        .await
    }

    async fn remove_embeddings(&self, chunk_ids: &[i64]) -> Result<(), StoreError> {
        self.update(|vectors| {
            let before = vectors.len();
            for chunk_id in chunk_ids {
                vectors.remove(chunk_id);
            }
            vectors.len() != before
        })
        .await
    }

    async fn search(&self, query_vector: &[f32], top_k: usize) -> Result<Vec<VectorHit>, StoreError> {
        check_vector(self.vector_size, query_vector)?;

        let vectors = self.vectors.read().await;
        let hits = vectors
            .iter()
            .map(|(chunk_id, vector)| VectorHit {
                chunk_id: *chunk_id,
                distance: distance(self.metric, query_vector, vector),
            })
            .collect();
        Ok(rank_hits(hits, top_k))
    }
}
