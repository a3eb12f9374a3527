use crate::chunking::content_hash;
use crate::models::NewDocument;
use crate::orchestrator::{IngestedDocument, StoreCoordinator};
use crate::IngestError;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

pub fn discover_text_files(folder: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|wanted| ext.eq_ignore_ascii_case(wanted)));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Stable id for a source path, so re-ingesting the same file collides.
pub fn document_id_for_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn document_for_file(path: &Path, contents: &str) -> Result<NewDocument, IngestError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

    Ok(NewDocument {
        id: Some(document_id_for_path(path)),
        name: name.to_string(),
        description: String::new(),
        metadata: json!({
            "source": "upload",
            "checksum": content_hash(contents),
            "bytes": contents.len(),
        })
        .to_string(),
        file_path: path.to_string_lossy().to_string(),
    })
}

pub async fn ingest_file(
    coordinator: &StoreCoordinator,
    path: &Path,
) -> Result<IngestedDocument, IngestError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let document = document_for_file(path, &contents)?;
    coordinator.ingest_text(document, &contents).await
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub documents: Vec<IngestedDocument>,
    pub skipped_files: Vec<SkippedFile>,
}

impl IngestionReport {
    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|item| item.chunks.len()).sum()
    }
}

/// Ingests every matching file under `folder`. A file that fails is recorded
/// in `skipped_files` and the rest carry on.
pub async fn ingest_folder_best_effort(
    coordinator: &StoreCoordinator,
    folder: &Path,
) -> Result<IngestionReport, IngestError> {
    let files = discover_text_files(folder, &coordinator.options().extensions);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no text files found in {}",
            folder.display()
        )));
    }

    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        match ingest_file(coordinator, &path).await {
            Ok(document) => documents.push(document),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping file");
                skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(IngestionReport {
        documents,
        skipped_files,
    })
}
