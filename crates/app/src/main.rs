use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use ragstore_core::ingest::document_for_file;
use ragstore_core::{
    ingest_folder_best_effort, open_backend, CharacterNgramEmbedder, ClickHouseConfig,
    DistanceMetric, IngestionOptions, StoreConfig, StoreCoordinator, VectorStorage,
    DEFAULT_VECTOR_DIM,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ragstore", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Active vector backend: pgvector, clickhouse, faiss or sqlite
    #[arg(long, env = "VECTOR_STORAGE", default_value = "sqlite")]
    vector_storage: String,

    /// Connection string for documents, chunks and stats
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://ragstore.db")]
    database_url: String,

    /// Embedding dimensionality, fixed for the lifetime of a store
    #[arg(long, env = "VECTOR_DIM")]
    vector_dim: Option<usize>,

    /// Older name for the embedding dimensionality, read when VECTOR_DIM is unset
    #[arg(long, env = "FAISS_DIMENSION", hide = true)]
    faiss_dimension: Option<usize>,

    /// Distance metric: l2 or cosine
    #[arg(long, env = "VECTOR_METRIC", default_value = "l2")]
    metric: String,

    /// Connect timeout in seconds
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    connect_timeout_secs: u64,

    /// ClickHouse HTTP endpoint
    #[arg(long, env = "CLICKHOUSE_URL", default_value = "http://localhost:8123")]
    clickhouse_url: String,

    /// ClickHouse user
    #[arg(long, env = "CLICKHOUSE_USER", default_value = "default")]
    clickhouse_user: String,

    /// ClickHouse password
    #[arg(long, env = "CLICKHOUSE_PASSWORD", default_value = "", hide_env_values = true)]
    clickhouse_password: String,

    /// ClickHouse database
    #[arg(long, env = "CLICKHOUSE_DATABASE", default_value = "default")]
    clickhouse_database: String,

    /// Sidecar index file used when VECTOR_STORAGE=faiss
    #[arg(long, env = "FAISS_INDEX_PATH")]
    faiss_index_path: Option<PathBuf>,

    /// Maximum characters per chunk
    #[arg(long, default_value = "1000")]
    chunk_max_chars: usize,

    /// Characters shared between consecutive windows of a long paragraph
    #[arg(long, default_value = "100")]
    chunk_overlap_chars: usize,
}

impl Cli {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let storage: VectorStorage = self.vector_storage.parse()?;
        let metric: DistanceMetric = self
            .metric
            .parse()
            .map_err(|error: String| anyhow::anyhow!(error))?;

        Ok(StoreConfig {
            storage,
            database_url: self.database_url.clone(),
            vector_dim: self.vector_dim(),
            metric,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            clickhouse: ClickHouseConfig {
                url: self.clickhouse_url.clone(),
                user: self.clickhouse_user.clone(),
                password: self.clickhouse_password.clone(),
                database: self.clickhouse_database.clone(),
            },
            faiss_index_path: self.faiss_index_path.clone(),
        })
    }

    fn vector_dim(&self) -> usize {
        self.vector_dim
            .or(self.faiss_dimension)
            .unwrap_or(DEFAULT_VECTOR_DIM)
    }

    fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_max_chars: self.chunk_max_chars,
            chunk_overlap_chars: self.chunk_overlap_chars,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create tables and the stats row for the configured backend.
    Init,
    /// Ingest every .txt/.md file under a folder.
    Ingest {
        /// Folder searched recursively.
        #[arg(long)]
        folder: PathBuf,
    },
    /// Add a single file as a document.
    Add {
        #[arg(long)]
        file: PathBuf,
        /// Document id; derived from the path when omitted.
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Free-form metadata, usually JSON.
        #[arg(long)]
        metadata: Option<String>,
    },
    /// List stored documents.
    Documents,
    /// Show one document.
    Show {
        #[arg(long)]
        id: String,
    },
    /// Print a document's chunks in order.
    Chunks {
        #[arg(long)]
        id: String,
    },
    /// Replace a document's metadata.
    SetMetadata {
        #[arg(long)]
        id: String,
        #[arg(long)]
        metadata: String,
    },
    /// Delete a document with its chunks and embeddings.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Retrieve the chunks nearest to a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
    /// Print the stats row.
    Stats,
    /// Recount documents and chunks into the stats row.
    Reconcile,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.store_config()?;

    info!(
        version = app_version,
        storage = %config.storage,
        started_at = %Utc::now().to_rfc3339(),
        "ragstore boot"
    );

    let backend = open_backend(&config)
        .await
        .with_context(|| format!("opening {} backend", config.storage))?;
    let embedder = Arc::new(CharacterNgramEmbedder::new(config.vector_dim));
    let coordinator =
        StoreCoordinator::new(backend, embedder)?.with_options(cli.ingestion_options());

    match cli.command {
        Command::Init => {
            let stats = coordinator.stats().await?;
            println!(
                "{} store ready (vector_dim={})",
                config.storage, stats.vector_dim
            );
        }
        Command::Ingest { folder } => {
            let report = ingest_folder_best_effort(&coordinator, &folder).await?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    folder.display()
                );
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
                }
            }

            println!(
                "{} documents, {} chunks ingested at {}",
                report.documents.len(),
                report.chunk_count(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Add {
            file,
            id,
            name,
            description,
            metadata,
        } => {
            let contents = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let mut document = document_for_file(&file, &contents)?;
            if id.is_some() {
                document.id = id;
            }
            if let Some(name) = name {
                document.name = name;
            }
            if let Some(metadata) = metadata {
                document.metadata = metadata;
            }
            document.description = description;
            let ingested = coordinator.ingest_text(document, &contents).await?;

            println!(
                "{} ({} chunks)",
                ingested.document.id,
                ingested.chunks.len()
            );
        }
        Command::Documents => {
            for document in coordinator.metadata().list_documents().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    document.id,
                    document.name,
                    document.file_path,
                    document.created_at.to_rfc3339()
                );
            }
        }
        Command::Show { id } => {
            let document = coordinator.metadata().get_document(&id).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Command::Chunks { id } => {
            let mut chunks = coordinator.metadata().chunks_for_document(&id);
            while let Some(chunk) = chunks.try_next().await? {
                println!("[{}] chunk={} {}", chunk.chunk_index, chunk.id, chunk.chunk_text);
            }
        }
        Command::SetMetadata { id, metadata } => {
            let document = coordinator.update_document_metadata(&id, &metadata).await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Command::Delete { id } => {
            coordinator.delete_document(&id).await?;
            println!("deleted {id}");
        }
        Command::Search { query, top_k } => {
            let context = coordinator.retrieve_context(&query, top_k).await?;
            if context.degraded {
                println!("vector index unavailable; no context retrieved");
            }

            println!("query: {}", context.query);
            for chunk in context.chunks {
                println!(
                    "distance={:.4} chunk={} document_id={} index={}",
                    chunk.distance, chunk.chunk_id, chunk.document_id, chunk.chunk_index
                );
                println!("  {}", chunk.text);
            }
        }
        Command::Stats => {
            let stats = coordinator.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Reconcile => {
            let stats = coordinator.reconcile_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
