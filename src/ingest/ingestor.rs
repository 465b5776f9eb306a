// file: src/ingest/ingestor.rs
// description: validates and normalizes csv rows or local paths into link records
// reference: https://docs.rs/csv, https://docs.rs/url, https://docs.rs/walkdir

use crate::error::{PipelineError, Result, ValidationError, ValidationReason};
use crate::ingest::resolver::SourceResolver;
use crate::models::{LinkRecord, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;

const EMPTY_MARKERS: [&str; 3] = ["nan", "none", "null"];
const INVISIBLE_CHARS: [char; 5] = ['\u{feff}', '\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}'];

#[derive(Debug, Clone)]
pub enum InputSource {
    Csv { path: PathBuf, link_column: String },
    LocalFiles(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRow {
    pub row_index: usize,
    pub reference: String,
    pub reason: String,
    pub kept_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub duplicates: usize,
    pub rejected_by_reason: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_extension: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionResult {
    pub records: Vec<LinkRecord>,
    pub rejected: Vec<ValidationError>,
    pub skipped: Vec<DuplicateRow>,
    pub summary: IngestionSummary,
}

impl IngestionResult {
    fn finalize(mut self, total_rows: usize) -> Self {
        let mut summary = IngestionSummary {
            total_rows,
            valid_rows: self.records.len(),
            duplicates: self.skipped.len(),
            ..Default::default()
        };

        for rejection in &self.rejected {
            *summary
                .rejected_by_reason
                .entry(rejection.reason.as_str().to_string())
                .or_insert(0) += 1;
        }

        for record in &self.records {
            *summary
                .by_source
                .entry(record.source_kind.as_str().to_string())
                .or_insert(0) += 1;

            let extension = record.extension();
            let key = if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            };
            *summary.by_extension.entry(key).or_insert(0) += 1;
        }

        self.summary = summary;
        self
    }
}

/// Outcome of normalizing a single raw value.
struct Normalized {
    reference: String,
    kind: SourceKind,
    file_name: Option<String>,
}

pub struct LinkIngestor {
    resolver: SourceResolver,
}

impl LinkIngestor {
    pub fn new(resolver: SourceResolver) -> Self {
        Self { resolver }
    }

    pub fn ingest(&self, input: &InputSource) -> Result<IngestionResult> {
        match input {
            InputSource::Csv { path, link_column } => {
                info!("Reading links from CSV: {}", path.display());
                let file = std::fs::File::open(path).map_err(|e| {
                    PipelineError::Input(format!("cannot read {}: {}", path.display(), e))
                })?;
                self.ingest_csv(file, link_column)
            }
            InputSource::LocalFiles(paths) => self.ingest_local(paths),
        }
    }

    pub fn ingest_csv<R: Read>(&self, reader: R, link_column: &str) -> Result<IngestionResult> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| clean_value(h).to_string())
            .collect();

        let link_index = headers
            .iter()
            .position(|h| h == link_column)
            .ok_or_else(|| PipelineError::MissingColumn {
                column: link_column.to_string(),
                available: headers.join(", "),
            })?;

        let mut result = IngestionResult::default();
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut total_rows = 0;

        for (row_index, row) in csv_reader.records().enumerate() {
            let row = row?;
            total_rows += 1;

            let raw = row.get(link_index).unwrap_or("").to_string();
            let metadata: BTreeMap<String, String> = headers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != link_index)
                .map(|(i, name)| (name.clone(), row.get(i).unwrap_or("").to_string()))
                .collect();

            match self.normalize_reference(&raw) {
                Ok(normalized) => self.accept(&mut result, &mut seen, row_index, raw, normalized, metadata),
                Err(reason) => {
                    debug!("Rejected row {}: {}", row_index, reason.as_str());
                    result.rejected.push(ValidationError {
                        row_index,
                        reference: raw,
                        reason,
                    });
                }
            }
        }

        let result = result.finalize(total_rows);
        log_summary(&result.summary);
        Ok(result)
    }

    /// Directories are expanded recursively into the files they contain.
    pub fn ingest_local(&self, paths: &[PathBuf]) -> Result<IngestionResult> {
        let mut result = IngestionResult::default();
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut row_index = 0;

        for path in paths {
            let expanded = if path.is_dir() {
                expand_directory(path)
            } else {
                vec![path.clone()]
            };

            for file in expanded {
                let raw = file.to_string_lossy().to_string();
                match self.normalize_local(&clean_value(&raw).to_string()) {
                    Ok(normalized) => self.accept(
                        &mut result,
                        &mut seen,
                        row_index,
                        raw,
                        normalized,
                        BTreeMap::new(),
                    ),
                    Err(reason) => result.rejected.push(ValidationError {
                        row_index,
                        reference: raw,
                        reason,
                    }),
                }
                row_index += 1;
            }
        }

        let result = result.finalize(row_index);
        log_summary(&result.summary);
        Ok(result)
    }

    fn accept(
        &self,
        result: &mut IngestionResult,
        seen: &mut HashMap<String, String>,
        row_index: usize,
        raw: String,
        normalized: Normalized,
        metadata: BTreeMap<String, String>,
    ) {
        if let Some(kept_id) = seen.get(&normalized.reference) {
            debug!("Duplicate reference at row {}: {}", row_index, normalized.reference);
            result.skipped.push(DuplicateRow {
                row_index,
                reference: raw,
                reason: "duplicate".to_string(),
                kept_id: kept_id.clone(),
            });
            return;
        }

        let record = LinkRecord::new(
            row_index,
            raw,
            normalized.reference,
            normalized.kind,
            normalized.file_name,
            metadata,
        );
        seen.insert(record.normalized_reference.clone(), record.id.clone());
        result.records.push(record);
    }

    fn normalize_reference(&self, raw: &str) -> std::result::Result<Normalized, ValidationReason> {
        let value = clean_value(raw);
        if value.is_empty() || EMPTY_MARKERS.contains(&value.to_lowercase().as_str()) {
            return Err(ValidationReason::Empty);
        }

        match Url::parse(value) {
            Ok(url) => match url.scheme() {
                "http" | "https" => {
                    if url.host_str().is_none_or(str::is_empty) {
                        return Err(ValidationReason::InvalidUrl);
                    }
                    let reference = url.to_string();
                    Ok(Normalized {
                        kind: self.resolver.resolve(&reference),
                        file_name: url_file_name(&url),
                        reference,
                    })
                }
                "file" => {
                    let path = url.to_file_path().map_err(|_| ValidationReason::InvalidUrl)?;
                    self.normalize_local(&path.to_string_lossy())
                }
                _ => Err(ValidationReason::UnsupportedScheme),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => self.normalize_local(value),
            Err(_) => Err(ValidationReason::InvalidUrl),
        }
    }

    fn normalize_local(&self, value: &str) -> std::result::Result<Normalized, ValidationReason> {
        if value.is_empty() {
            return Err(ValidationReason::Empty);
        }

        let absolute = std::path::absolute(Path::new(value)).map_err(|_| ValidationReason::MissingFile)?;
        if !absolute.is_file() {
            return Err(ValidationReason::MissingFile);
        }

        Ok(Normalized {
            reference: absolute.to_string_lossy().to_string(),
            kind: SourceKind::LocalFile,
            file_name: absolute
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
        })
    }
}

impl Default for LinkIngestor {
    fn default() -> Self {
        Self::new(SourceResolver::default())
    }
}

fn clean_value(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || INVISIBLE_CHARS.contains(&c))
}

/// Last path segment, kept only when it carries an extension.
fn url_file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .filter(|segment| segment.contains('.'))
        .map(|segment| segment.to_string())
}

fn expand_directory(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();

    if files.is_empty() {
        warn!("Directory contains no files: {}", root.display());
    }
    files
}

fn log_summary(summary: &IngestionSummary) {
    info!(
        "Ingested {} rows: {} valid, {} rejected, {} duplicates",
        summary.total_rows,
        summary.valid_rows,
        summary.rejected_by_reason.values().sum::<usize>(),
        summary.duplicates
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_csv_rows_are_normalized() {
        let csv = "link,owner\n\u{feff} https://app.box.com/s/abc123 ,alice\nhttps://example.org/files/report.PDF,bob\n";
        let result = LinkIngestor::default()
            .ingest_csv(csv.as_bytes(), "link")
            .unwrap();

        assert_eq!(result.records.len(), 2);
        let first = &result.records[0];
        assert_eq!(first.normalized_reference, "https://app.box.com/s/abc123");
        assert_eq!(first.source_kind, SourceKind::Box);
        assert_eq!(first.row_metadata.get("owner").map(String::as_str), Some("alice"));
        assert!(first.file_name.starts_with("file_"));

        let second = &result.records[1];
        assert_eq!(second.source_kind, SourceKind::GenericHttp);
        assert_eq!(second.file_name, "report.PDF");
        assert_eq!(result.summary.by_extension.get(".pdf"), Some(&1));
    }

    #[test]
    fn test_missing_column_is_fatal() {
        let csv = "url,owner\nhttps://example.org/a.pdf,alice\n";
        let err = LinkIngestor::default()
            .ingest_csv(csv.as_bytes(), "link")
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_rows_do_not_abort() {
        let csv = "link\nnan\n\nftp://example.org/a.pdf\nhttps://\nhttps://example.org/ok.pdf\n/definitely/not/here.pdf\n";
        let result = LinkIngestor::default()
            .ingest_csv(csv.as_bytes(), "link")
            .unwrap();

        assert_eq!(result.records.len(), 1);
        let reasons: Vec<ValidationReason> = result.rejected.iter().map(|r| r.reason).collect();
        assert!(reasons.contains(&ValidationReason::Empty));
        assert!(reasons.contains(&ValidationReason::UnsupportedScheme));
        assert!(reasons.contains(&ValidationReason::InvalidUrl));
        assert!(reasons.contains(&ValidationReason::MissingFile));
        assert_eq!(result.summary.valid_rows, 1);
    }

    #[test]
    fn test_duplicates_keep_first() {
        let csv = "link\nhttps://example.org/a.pdf\nhttps://EXAMPLE.org/a.pdf\n";
        let result = LinkIngestor::default()
            .ingest_csv(csv.as_bytes(), "link")
            .unwrap();

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].row_index, 1);
        assert_eq!(result.skipped[0].kept_id, result.records[0].id);
        assert_eq!(result.skipped[0].reason, "duplicate");
    }

    #[test]
    fn test_local_mode_expands_directories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("b.csv"), "x,y").unwrap();

        let result = LinkIngestor::default()
            .ingest_local(&[dir.path().to_path_buf(), dir.path().join("missing.pdf")])
            .unwrap();

        assert_eq!(result.records.len(), 2);
        assert!(result.records.iter().all(|r| r.source_kind == SourceKind::LocalFile));
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].reason, ValidationReason::MissingFile);
        assert_eq!(result.summary.total_rows, 3);
    }
}
