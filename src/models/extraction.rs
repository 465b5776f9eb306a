// file: src/models/extraction.rs
// description: extracted text units and per-link extraction outcome
// reference: internal data structures

use crate::error::ExtractionErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    FullText,
    Page,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMethod {
    Native,
    Ocr,
    Both,
}

impl fmt::Display for SourceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceMethod::Native => "native",
            SourceMethod::Ocr => "ocr",
            SourceMethod::Both => "both",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    PlainText,
    Csv,
    Spreadsheet,
    WordDocument,
    Pdf,
    Image,
    Presentation,
    Unknown,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::PlainText => "plain_text",
            FileFormat::Csv => "csv",
            FileFormat::Spreadsheet => "spreadsheet",
            FileFormat::WordDocument => "word_document",
            FileFormat::Pdf => "pdf",
            FileFormat::Image => "image",
            FileFormat::Presentation => "presentation",
            FileFormat::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionUnit {
    pub link_id: String,
    pub unit_index: usize,
    pub unit_kind: UnitKind,
    pub text: String,
    pub source_method: SourceMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ExtractionErrorKind>,
}

impl ExtractionUnit {
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExtractionStatus {
    Success,
    Skipped { reason: ExtractionErrorKind },
    Failed { kind: ExtractionErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub link_id: String,
    pub format: FileFormat,
    pub status: ExtractionStatus,
    pub units: Vec<ExtractionUnit>,
}

impl ExtractionResult {
    pub fn skipped(link_id: &str, format: FileFormat, reason: ExtractionErrorKind) -> Self {
        Self {
            link_id: link_id.to_string(),
            format,
            status: ExtractionStatus::Skipped { reason },
            units: Vec::new(),
        }
    }

    pub fn failed(link_id: &str, format: FileFormat, kind: ExtractionErrorKind, message: String) -> Self {
        Self {
            link_id: link_id.to_string(),
            format,
            status: ExtractionStatus::Failed { kind, message },
            units: Vec::new(),
        }
    }
}
