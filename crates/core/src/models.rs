use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub description: String,
    pub metadata: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
}

/// Caller input for a new document. A missing id is replaced by a UUIDv4.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub metadata: String,
    pub file_path: String,
}

impl NewDocument {
    pub fn new(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn resolved_id(&self) -> String {
        self.id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub document_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: String,
}

impl NewChunk {
    pub fn new(chunk_index: i64, chunk_text: impl Into<String>) -> Self {
        Self {
            chunk_index,
            chunk_text: chunk_text.into(),
            ..Default::default()
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// The singleton counter row (`id = 1`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorDbStats {
    pub documents_count: i64,
    pub chunks_count: i64,
    pub vector_dim: usize,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    L2,
    Cosine,
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "cosine" => Ok(Self::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub document_id: String,
    pub chunk_index: i64,
    pub distance: f64,
    pub text: String,
}

/// Chunks retrieved to ground a response. `degraded` is set when the vector
/// index could not be reached and retrieval fell back to no context.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetrievedContext {
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub min_chunk_chars: usize,
    pub extensions: Vec<String>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 100,
            min_chunk_chars: 1,
            extensions: vec!["txt".to_string(), "md".to_string()],
        }
    }
}
