use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("embedding dimension {actual} does not match configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding component {index} is not finite: {value}")]
    NonFiniteVector { index: usize, value: f32 },

    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db_error) => match db_error.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    StoreError::DuplicateKey(db_error.message().to_string())
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    StoreError::ForeignKeyViolation(db_error.message().to_string())
                }
                _ => StoreError::Database(error),
            },
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            _ => StoreError::Database(error),
        }
    }
}

impl StoreError {
    /// Connection-level failures that make the index unreachable rather than
    /// the request invalid.
    pub fn into_unavailable(self) -> Self {
        match self {
            StoreError::Database(
                error @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)),
            ) => StoreError::IndexUnavailable(error.to_string()),
            StoreError::Http(error) if error.is_connect() || error.is_timeout() => {
                StoreError::IndexUnavailable(error.to_string())
            }
            StoreError::Io(error) => StoreError::IndexUnavailable(error.to_string()),
            other => other,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::IndexUnavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
