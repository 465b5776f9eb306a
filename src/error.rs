// file: src/error.rs
// description: run-level error type plus the per-stage item error taxonomy
// reference: https://docs.rs/thiserror

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that stop the run. Everything item-scoped is captured in the
/// owning entity's status instead of surfacing here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required input column '{column}' not found (available: {available})")]
    MissingColumn { column: String, available: String },

    #[error("Input error: {0}")]
    Input(String),

    #[error("File operation failed for {path}: {source}")]
    FileOperation {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Illegal state transition for {link_id}: {message}")]
    StateTransition { link_id: String, message: String },

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl PipelineError {
    /// Wraps an io error for `path`, promoting a full disk to `ResourceExhausted`.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::StorageFull {
            return PipelineError::ResourceExhausted(format!(
                "storage full while writing {}",
                path.display()
            ));
        }
        PipelineError::FileOperation { path, source }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingColumn { .. }
                | PipelineError::Input(_)
                | PipelineError::ResourceExhausted(_)
                | PipelineError::Config(_)
        )
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Input(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Empty,
    InvalidUrl,
    UnsupportedScheme,
    MissingFile,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Empty => "empty",
            ValidationReason::InvalidUrl => "invalid_url",
            ValidationReason::UnsupportedScheme => "unsupported_scheme",
            ValidationReason::MissingFile => "missing_file",
        }
    }
}

/// A malformed input row. The batch continues without it.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[error("row {row_index}: {reason:?} ({reference})")]
pub struct ValidationError {
    pub row_index: usize,
    pub reference: String,
    pub reason: ValidationReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadErrorKind {
    Timeout,
    Auth,
    NotFound,
    Network,
    TooLarge,
    Unknown,
}

impl DownloadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadErrorKind::Timeout => "timeout",
            DownloadErrorKind::Auth => "auth",
            DownloadErrorKind::NotFound => "not_found",
            DownloadErrorKind::Network => "network",
            DownloadErrorKind::TooLarge => "too_large",
            DownloadErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct DownloadError {
    pub kind: DownloadErrorKind,
    pub message: String,
    /// Set for transient failures (5xx, 429, connection reset, timeout).
    pub transient: bool,
}

impl DownloadError {
    pub fn new(kind: DownloadErrorKind, message: impl Into<String>) -> Self {
        let transient = matches!(kind, DownloadErrorKind::Timeout | DownloadErrorKind::Network);
        Self {
            kind,
            message: message.into(),
            transient,
        }
    }

    pub fn permanent(kind: DownloadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            transient: false,
        }
    }

    /// Maps an HTTP status onto the download taxonomy.
    pub fn from_status(status: u16, reference: &str) -> Self {
        let message = format!("HTTP {} for {}", status, reference);
        match status {
            401 | 403 => Self::permanent(DownloadErrorKind::Auth, message),
            404 | 410 => Self::permanent(DownloadErrorKind::NotFound, message),
            429 | 500..=599 => Self::new(DownloadErrorKind::Network, message),
            _ => Self::permanent(DownloadErrorKind::Unknown, message),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(DownloadErrorKind::Timeout, err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.url().map(|u| u.as_str()).unwrap_or(""))
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::new(DownloadErrorKind::Network, err.to_string())
        } else {
            Self::permanent(DownloadErrorKind::Unknown, err.to_string())
        }
    }
}

impl fmt::Display for DownloadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionErrorKind {
    UnsupportedFormat,
    CorruptFile,
    OcrTimeout,
    OcrFailed,
    OcrSkipped,
}

impl ExtractionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionErrorKind::UnsupportedFormat => "unsupported_format",
            ExtractionErrorKind::CorruptFile => "corrupt_file",
            ExtractionErrorKind::OcrTimeout => "ocr_timeout",
            ExtractionErrorKind::OcrFailed => "ocr_failed",
            ExtractionErrorKind::OcrSkipped => "ocr_skipped",
        }
    }
}

impl fmt::Display for ExtractionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub message: String,
}

impl ExtractionError {
    pub fn new(kind: ExtractionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(ExtractionErrorKind::CorruptFile, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionErrorKind {
    ProviderUnreachable,
    ProviderTimeout,
    ParseError,
}

impl DetectionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionErrorKind::ProviderUnreachable => "provider_unreachable",
            DetectionErrorKind::ProviderTimeout => "provider_timeout",
            DetectionErrorKind::ParseError => "parse_error",
        }
    }
}

impl fmt::Display for DetectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct DetectionError {
    pub kind: DetectionErrorKind,
    pub message: String,
}

impl DetectionError {
    pub fn new(kind: DetectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(DetectionErrorKind::ProviderTimeout, err.to_string())
        } else if err.is_decode() {
            Self::new(DetectionErrorKind::ParseError, err.to_string())
        } else {
            Self::new(DetectionErrorKind::ProviderUnreachable, err.to_string())
        }
    }
}
