// file: src/models/download.rs
// description: per-link download outcome persisted for resume
// reference: internal data structures

use crate::error::DownloadErrorKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub link_id: String,
    pub status: DownloadStatus,
    pub local_path: Option<PathBuf>,
    pub byte_size: Option<u64>,
    pub content_hash: Option<String>,
    pub error_kind: Option<DownloadErrorKind>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub finished_at: String,
}

impl DownloadResult {
    pub fn success(link_id: &str, local_path: PathBuf, byte_size: u64, hash: String, attempts: u32) -> Self {
        Self {
            link_id: link_id.to_string(),
            status: DownloadStatus::Success,
            local_path: Some(local_path),
            byte_size: Some(byte_size),
            content_hash: Some(hash),
            error_kind: None,
            error_message: None,
            attempts,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn failed(link_id: &str, kind: DownloadErrorKind, message: String, attempts: u32) -> Self {
        Self {
            link_id: link_id.to_string(),
            status: DownloadStatus::Failed,
            local_path: None,
            byte_size: None,
            content_hash: None,
            error_kind: Some(kind),
            error_message: Some(message),
            attempts,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }

    /// A success whose file is still on disk.
    pub fn is_reusable(&self) -> bool {
        self.is_success() && self.local_path.as_ref().is_some_and(|p| p.is_file())
    }
}
