// file: src/models/link.rs
// description: normalized input reference and its source classification
// reference: internal data structures

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Box,
    Sharepoint,
    Onedrive,
    GoogleDrive,
    Dropbox,
    GenericHttp,
    LocalFile,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Box => "box",
            SourceKind::Sharepoint => "sharepoint",
            SourceKind::Onedrive => "onedrive",
            SourceKind::GoogleDrive => "google_drive",
            SourceKind::Dropbox => "dropbox",
            SourceKind::GenericHttp => "generic_http",
            SourceKind::LocalFile => "local_file",
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, SourceKind::LocalFile)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: String,
    pub row_index: usize,
    pub raw_reference: String,
    pub normalized_reference: String,
    pub source_kind: SourceKind,
    pub file_name: String,
    #[serde(default)]
    pub row_metadata: BTreeMap<String, String>,
}

impl LinkRecord {
    pub fn new(
        row_index: usize,
        raw_reference: String,
        normalized_reference: String,
        source_kind: SourceKind,
        file_name: Option<String>,
        row_metadata: BTreeMap<String, String>,
    ) -> Self {
        let id = Self::compute_id(&normalized_reference);
        let file_name = file_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("file_{}", id));

        Self {
            id,
            row_index,
            raw_reference,
            normalized_reference,
            source_kind,
            file_name,
            row_metadata,
        }
    }

    /// First 16 hex chars of the reference's SHA-256, stable across runs.
    pub fn compute_id(normalized_reference: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized_reference.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    /// Lowercased extension of the file name including the dot, or empty.
    pub fn extension(&self) -> String {
        match self.file_name.rfind('.') {
            Some(pos) if pos + 1 < self.file_name.len() => self.file_name[pos..].to_lowercase(),
            _ => String::new(),
        }
    }
}
