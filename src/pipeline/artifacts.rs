// file: src/pipeline/artifacts.rs
// description: per-stage json artifacts under the output directory with atomic writes
// reference: json persistence with tokio::fs

use crate::error::{PipelineError, Result};
use crate::ingest::IngestionResult;
use crate::models::{DetectionResult, DownloadResult, ExtractionResult, Stage, TextChunk};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Serializes `value` to a sibling temp file and renames it over `path`.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::file(parent, e))?;
    }

    let contents = serde_json::to_vec_pretty(value)?;
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, contents)
        .await
        .map_err(|e| PipelineError::file(&tmp_path, e))?;

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(PipelineError::file(path, e));
    }
    Ok(())
}

/// A missing file is `None`. An unreadable or unparsable one is treated as
/// absent so the stage that produces it runs again.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Ignoring unreadable artifact {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring invalid artifact {}: {}", path.display(), e);
            None
        }
    }
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn init(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.downloads_dir(),
            self.extraction_dir(),
            self.chunks_dir(),
            self.findings_dir(),
            self.files_dir(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| PipelineError::file(&dir, e))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn extraction_dir(&self) -> PathBuf {
        self.root.join("extraction")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunks")
    }

    pub fn findings_dir(&self) -> PathBuf {
        self.root.join("findings")
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn ingestion_path(&self) -> PathBuf {
        self.root.join("ingestion.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("summary.txt")
    }

    /// Artifact holding the output of the step that commits `stage`.
    pub fn stage_path(&self, stage: Stage, link_id: &str) -> Option<PathBuf> {
        let dir = match stage {
            Stage::Downloaded => self.downloads_dir(),
            Stage::Extracted => self.extraction_dir(),
            Stage::Chunked => self.chunks_dir(),
            Stage::Detected => self.findings_dir(),
            Stage::Queued | Stage::Done => return None,
        };
        Some(dir.join(format!("{}.json", link_id)))
    }

    pub async fn save_ingestion(&self, ingestion: &IngestionResult) -> Result<()> {
        write_json_atomic(&self.ingestion_path(), ingestion).await
    }

    pub async fn load_ingestion(&self) -> Option<IngestionResult> {
        read_json(&self.ingestion_path()).await
    }

    pub async fn save_download(&self, result: &DownloadResult) -> Result<()> {
        self.save(Stage::Downloaded, &result.link_id, result).await
    }

    pub async fn load_download(&self, link_id: &str) -> Option<DownloadResult> {
        self.load(Stage::Downloaded, link_id).await
    }

    pub async fn save_extraction(&self, result: &ExtractionResult) -> Result<()> {
        self.save(Stage::Extracted, &result.link_id, result).await
    }

    pub async fn load_extraction(&self, link_id: &str) -> Option<ExtractionResult> {
        self.load(Stage::Extracted, link_id).await
    }

    pub async fn save_chunks(&self, link_id: &str, chunks: &[TextChunk]) -> Result<()> {
        self.save(Stage::Chunked, link_id, chunks).await
    }

    pub async fn load_chunks(&self, link_id: &str) -> Option<Vec<TextChunk>> {
        self.load(Stage::Chunked, link_id).await
    }

    pub async fn save_findings(&self, result: &DetectionResult) -> Result<()> {
        self.save(Stage::Detected, &result.link_id, result).await
    }

    pub async fn load_findings(&self, link_id: &str) -> Option<DetectionResult> {
        self.load(Stage::Detected, link_id).await
    }

    async fn save<T: Serialize + ?Sized>(&self, stage: Stage, link_id: &str, value: &T) -> Result<()> {
        match self.stage_path(stage, link_id) {
            Some(path) => write_json_atomic(&path, value).await,
            None => Ok(()),
        }
    }

    async fn load<T: DeserializeOwned>(&self, stage: Stage, link_id: &str) -> Option<T> {
        let path = self.stage_path(stage, link_id)?;
        read_json(&path).await
    }

    /// Deletes the artifacts of `from` and every later stage for one item.
    /// Invalidating the download also removes the downloaded file.
    pub async fn invalidate(&self, link_id: &str, from: Stage) -> Result<usize> {
        let mut removed = 0;

        for stage in Stage::ALL.iter().filter(|s| **s >= from) {
            if let Some(path) = self.stage_path(*stage, link_id) {
                removed += remove_if_present(&path).await?;
            }
        }

        if from <= Stage::Downloaded {
            let files_dir = self.files_dir();
            let mut pending = Vec::new();
            if let Ok(mut entries) = fs::read_dir(&files_dir).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    let path = entry.path();
                    if path.file_stem().and_then(|s| s.to_str()) == Some(link_id) {
                        pending.push(path);
                    }
                }
            }
            for path in pending {
                removed += remove_if_present(&path).await?;
            }
        }

        debug!("Invalidated {} artifact(s) of {} from {}", removed, link_id, from);
        Ok(removed)
    }
}

async fn remove_if_present(path: &Path) -> Result<usize> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(1),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(PipelineError::file(path, e)),
    }
}
