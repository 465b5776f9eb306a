// file: src/pipeline/report.rs
// description: final run report assembled from persisted artifacts and item states
// reference: json export and text summary of pipeline results

use crate::error::{ExtractionErrorKind, PipelineError, Result, ValidationError};
use crate::ingest::{DuplicateRow, IngestionResult, IngestionSummary};
use crate::models::{
    DownloadStatus, ExtractionStatus, ExtractionUnit, Finding, ItemState, ItemStatus, LinkRecord,
    SourceMethod, UnitKind,
};
use crate::pipeline::artifacts::{ArtifactStore, read_json, write_json_atomic};
use crate::pipeline::state::StateMap;
use crate::processing::ChunkingSummary;
use crate::detection::rank_findings;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

pub const HIGH_SENSITIVITY_THRESHOLD: f32 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub version: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_secs: u64,
    pub output_dir: String,
    pub models: Vec<String>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub done: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    /// Committed stage of every item.
    pub by_stage: BTreeMap<String, usize>,
    /// Failed items keyed by the step that failed.
    pub failed_by_step: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub total_attempts: u32,
    pub by_error: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_units: usize,
    pub by_format: BTreeMap<String, usize>,
    pub by_method: BTreeMap<String, usize>,
    pub unit_errors: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total_findings: usize,
    pub conflicts: usize,
    pub degraded_chunks: usize,
    pub ai_skipped_chunks: usize,
    pub high_sensitivity_items: Vec<String>,
    pub categories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub link_id: String,
    pub row_index: usize,
    pub reference: String,
    pub source_kind: String,
    pub file_name: String,
    pub stage: String,
    pub status: String,
    pub error_kind: Option<String>,
    pub findings: usize,
    #[serde(default)]
    pub units: Vec<UnitReport>,
}

/// One extracted unit as it appears in the report. Empty units are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit_index: usize,
    pub unit_kind: UnitKind,
    pub source_method: SourceMethod,
    pub chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ExtractionErrorKind>,
}

impl UnitReport {
    fn from_unit(unit: &ExtractionUnit) -> Self {
        Self {
            unit_index: unit.unit_index,
            unit_kind: unit.unit_kind,
            source_method: unit.source_method,
            chars: unit.text.trim().chars().count(),
            error_kind: unit.error_kind,
        }
    }

    pub fn is_annotated(&self) -> bool {
        self.chars == 0 || self.error_kind.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunMetadata,
    pub counts: OutcomeCounts,
    pub ingestion: IngestionSummary,
    pub downloads: DownloadSummary,
    pub extraction: ExtractionSummary,
    pub chunking: ChunkingSummary,
    pub detection: DetectionSummary,
    pub items: Vec<ItemReport>,
    pub rejected: Vec<ValidationError>,
    pub duplicates: Vec<DuplicateRow>,
    pub findings: Vec<Finding>,
}

impl RunReport {
    /// Reads each item's artifacts so that items reused from earlier runs are covered too.
    pub async fn build(
        run: RunMetadata,
        ingestion: &IngestionResult,
        states: &StateMap,
        artifacts: &ArtifactStore,
    ) -> Self {
        let mut report = RunReport {
            run,
            counts: OutcomeCounts::default(),
            ingestion: ingestion.summary.clone(),
            downloads: DownloadSummary::default(),
            extraction: ExtractionSummary::default(),
            chunking: ChunkingSummary::default(),
            detection: DetectionSummary::default(),
            items: Vec::with_capacity(ingestion.records.len()),
            rejected: ingestion.rejected.clone(),
            duplicates: ingestion.skipped.clone(),
            findings: Vec::new(),
        };
        let mut high_sensitivity = BTreeSet::new();

        for record in &ingestion.records {
            let state = states.get(&record.id).cloned().unwrap_or_default();
            report.counts.record(&state);

            if let Some(download) = artifacts.load_download(&record.id).await {
                report.downloads.total_attempts += download.attempts;
                match download.status {
                    DownloadStatus::Success => {
                        report.downloads.succeeded += 1;
                        report.downloads.total_bytes += download.byte_size.unwrap_or(0);
                    }
                    DownloadStatus::Failed | DownloadStatus::Skipped => {
                        report.downloads.failed += 1;
                        let kind = download
                            .error_kind
                            .map(|k| k.as_str().to_string())
                            .unwrap_or_else(|| "unknown".to_string());
                        *report.downloads.by_error.entry(kind).or_insert(0) += 1;
                    }
                }
            }

            let mut units = Vec::new();
            if let Some(extraction) = artifacts.load_extraction(&record.id).await {
                report.extraction.record(&extraction);
                units = extraction.units.iter().map(UnitReport::from_unit).collect();
            }

            if let Some(chunks) = artifacts.load_chunks(&record.id).await {
                report.chunking.merge(&ChunkingSummary::from_chunks(&chunks));
            }

            let mut item_findings = 0;
            if let Some(detection) = artifacts.load_findings(&record.id).await {
                item_findings = detection.findings.len();
                report.detection.degraded_chunks += detection.degraded_chunks();
                report.detection.ai_skipped_chunks +=
                    detection.chunks.iter().filter(|c| c.ai_skipped).count();

                for finding in detection.findings {
                    if finding.confidence >= HIGH_SENSITIVITY_THRESHOLD {
                        high_sensitivity.insert(record.id.clone());
                    }
                    if finding.conflict {
                        report.detection.conflicts += 1;
                    }
                    *report
                        .detection
                        .categories
                        .entry(finding.category.as_str().to_string())
                        .or_insert(0) += 1;
                    report.findings.push(finding);
                }
            }

            report.items.push(ItemReport::new(record, &state, item_findings, units));
        }

        rank_findings(&mut report.findings);
        report.detection.total_findings = report.findings.len();
        report.detection.high_sensitivity_items = high_sensitivity.into_iter().collect();
        report
    }

    pub async fn write(&self, artifacts: &ArtifactStore) -> Result<()> {
        write_json_atomic(&artifacts.report_path(), self).await?;

        let summary_path = artifacts.summary_path();
        tokio::fs::write(&summary_path, self.render_summary())
            .await
            .map_err(|e| PipelineError::file(&summary_path, e))
    }

    pub async fn load(output_dir: &Path) -> Result<Self> {
        let path = ArtifactStore::new(output_dir).report_path();
        read_json(&path).await.ok_or_else(|| {
            PipelineError::Input(format!("no readable report at {}", path.display()))
        })
    }

    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "GraveKeeper run summary");
        let _ = writeln!(out, "=======================");
        let _ = writeln!(out, "Run:      {}", self.run.run_id);
        let _ = writeln!(out, "Started:  {}", self.run.started_at);
        let _ = writeln!(out, "Finished: {}", self.run.finished_at);
        let _ = writeln!(out, "Duration: {}s", self.run.duration_secs);
        if !self.run.models.is_empty() {
            let _ = writeln!(out, "Models:   {}", self.run.models.join(", "));
        }
        if self.run.cancelled {
            let _ = writeln!(out, "Run was cancelled before all items were dispatched");
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Ingestion: {} rows, {} valid, {} duplicates, {} rejected",
            self.ingestion.total_rows,
            self.ingestion.valid_rows,
            self.ingestion.duplicates,
            self.rejected.len()
        );
        let _ = writeln!(
            out,
            "Items:     {} done, {} failed, {} skipped, {} pending",
            self.counts.done, self.counts.failed, self.counts.skipped, self.counts.pending
        );
        for (step, count) in &self.counts.failed_by_step {
            let _ = writeln!(out, "  failed at {}: {}", step, count);
        }
        let _ = writeln!(
            out,
            "Downloads: {} ok, {} failed, {} bytes",
            self.downloads.succeeded, self.downloads.failed, self.downloads.total_bytes
        );
        let _ = writeln!(
            out,
            "Extraction: {} ok, {} skipped, {} failed, {} units",
            self.extraction.succeeded,
            self.extraction.skipped,
            self.extraction.failed,
            self.extraction.total_units
        );
        let _ = writeln!(
            out,
            "Chunks:    {} ({} chars, {} words, avg {:.1} chars)",
            self.chunking.total_chunks,
            self.chunking.total_chars,
            self.chunking.total_words,
            self.chunking.average_chunk_chars
        );
        let _ = writeln!(
            out,
            "Findings:  {} ({} conflicts, {} degraded chunks)",
            self.detection.total_findings, self.detection.conflicts, self.detection.degraded_chunks
        );
        for (category, count) in &self.detection.categories {
            let _ = writeln!(out, "  {}: {}", category, count);
        }
        let _ = writeln!(
            out,
            "High sensitivity items: {}",
            self.detection.high_sensitivity_items.len()
        );

        let problems: Vec<&ItemReport> = self
            .items
            .iter()
            .filter(|item| item.error_kind.is_some())
            .collect();
        if !problems.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failed items:");
            for item in problems {
                let _ = writeln!(out, "  {} {} [{}]", item.link_id, item.reference, item.status);
            }
        }

        let annotated: Vec<(&ItemReport, &UnitReport)> = self
            .items
            .iter()
            .flat_map(|item| item.units.iter().filter(|u| u.is_annotated()).map(move |u| (item, u)))
            .collect();
        if !annotated.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Annotated units:");
            for (item, unit) in annotated {
                let note = match unit.error_kind {
                    Some(kind) => kind.as_str(),
                    None => "empty",
                };
                let _ = writeln!(
                    out,
                    "  {} {} #{} ({}): {}",
                    item.link_id, item.file_name, unit.unit_index, unit.source_method, note
                );
            }
        }
        out
    }
}

impl OutcomeCounts {
    fn record(&mut self, state: &ItemState) {
        *self
            .by_stage
            .entry(state.stage.as_str().to_string())
            .or_insert(0) += 1;

        match &state.status {
            ItemStatus::Done => self.done += 1,
            ItemStatus::Skipped { .. } => self.skipped += 1,
            ItemStatus::Pending => self.pending += 1,
            ItemStatus::Failed { stage } => {
                self.failed += 1;
                *self
                    .failed_by_step
                    .entry(stage.step_name().to_string())
                    .or_insert(0) += 1;
            }
        }
    }
}

impl ExtractionSummary {
    fn record(&mut self, extraction: &crate::models::ExtractionResult) {
        match &extraction.status {
            ExtractionStatus::Success => self.succeeded += 1,
            ExtractionStatus::Skipped { .. } => self.skipped += 1,
            ExtractionStatus::Failed { .. } => self.failed += 1,
        }
        *self
            .by_format
            .entry(extraction.format.as_str().to_string())
            .or_insert(0) += 1;

        self.total_units += extraction.units.len();
        for unit in &extraction.units {
            *self
                .by_method
                .entry(unit.source_method.to_string())
                .or_insert(0) += 1;
            if let Some(kind) = unit.error_kind {
                *self.unit_errors.entry(kind.as_str().to_string()).or_insert(0) += 1;
            }
        }
    }
}

impl ItemReport {
    fn new(record: &LinkRecord, state: &ItemState, findings: usize, units: Vec<UnitReport>) -> Self {
        Self {
            link_id: record.id.clone(),
            row_index: record.row_index,
            reference: record.normalized_reference.clone(),
            source_kind: record.source_kind.as_str().to_string(),
            file_name: record.file_name.clone(),
            stage: state.stage.as_str().to_string(),
            status: state.describe(),
            error_kind: state.error_kind.clone(),
            findings,
            units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Category, DetectionResult, DownloadResult, ExtractionResult, FileFormat, FindingSource,
        SourceKind, Stage,
    };
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn metadata() -> RunMetadata {
        RunMetadata {
            run_id: "run".to_string(),
            version: "test".to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            finished_at: "2026-01-01T00:00:01Z".to_string(),
            duration_secs: 1,
            output_dir: "out".to_string(),
            models: vec!["llama3.1".to_string()],
            cancelled: false,
        }
    }

    fn record(reference: &str) -> LinkRecord {
        LinkRecord::new(
            0,
            reference.to_string(),
            reference.to_string(),
            SourceKind::GenericHttp,
            Some("doc.txt".to_string()),
            BTreeMap::new(),
        )
    }

    fn finding(link_id: &str, confidence: f32) -> Finding {
        Finding {
            link_id: link_id.to_string(),
            unit_index: 0,
            chunk_index: Some(0),
            category: Category::Email,
            matched_text: "jane@acme.com".to_string(),
            sources: vec![FindingSource::Heuristic("email".to_string())],
            confidence,
            conflict: false,
        }
    }

    #[tokio::test]
    async fn test_report_from_artifacts() {
        let dir = tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        artifacts.init().await.unwrap();

        let done = record("https://example.com/a.txt");
        let failed = record("https://example.com/b.txt");

        artifacts
            .save_download(&DownloadResult::success(&done.id, dir.path().join("a"), 10, "h".into(), 1))
            .await
            .unwrap();
        artifacts
            .save_findings(&DetectionResult {
                link_id: done.id.clone(),
                chunks: vec![],
                findings: vec![finding(&done.id, 0.9)],
            })
            .await
            .unwrap();

        let mut states = StateMap::new();
        let mut done_state = ItemState::new();
        for stage in [Stage::Downloaded, Stage::Extracted, Stage::Chunked, Stage::Detected, Stage::Done] {
            done_state.advance(stage).unwrap();
        }
        states.insert(done.id.clone(), done_state);
        let mut failed_state = ItemState::new();
        failed_state.fail(Stage::Downloaded, "not_found");
        states.insert(failed.id.clone(), failed_state);

        let ingestion = IngestionResult {
            records: vec![done.clone(), failed.clone()],
            ..Default::default()
        };

        let report = RunReport::build(metadata(), &ingestion, &states, &artifacts).await;
        assert_eq!(report.counts.done, 1);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.failed_by_step.get("download"), Some(&1));
        assert_eq!(report.downloads.succeeded, 1);
        assert_eq!(report.detection.total_findings, 1);
        assert_eq!(report.detection.high_sensitivity_items, vec![done.id.clone()]);
        assert_eq!(report.detection.categories.get("email"), Some(&1));
        assert_eq!(report.items[1].status, "failed(download, not_found)");

        report.write(&artifacts).await.unwrap();
        let loaded = RunReport::load(dir.path()).await.unwrap();
        assert_eq!(loaded.counts, report.counts);
        let summary = std::fs::read_to_string(artifacts.summary_path()).unwrap();
        assert!(summary.contains("1 done, 1 failed"));
    }

    #[tokio::test]
    async fn test_item_lists_empty_and_timed_out_units() {
        let dir = tempdir().unwrap();
        let artifacts = ArtifactStore::new(dir.path());
        artifacts.init().await.unwrap();

        let item = record("https://example.com/scan.pdf");
        let unit = |index: usize, text: &str, method, error_kind| ExtractionUnit {
            link_id: item.id.clone(),
            unit_index: index,
            unit_kind: UnitKind::Page,
            text: text.to_string(),
            source_method: method,
            error_kind,
        };
        artifacts
            .save_extraction(&ExtractionResult {
                link_id: item.id.clone(),
                format: FileFormat::Pdf,
                status: ExtractionStatus::Success,
                units: vec![
                    unit(0, "Invoice #4521", SourceMethod::Both, None),
                    unit(1, "", SourceMethod::Native, None),
                    unit(2, "Terms", SourceMethod::Native, Some(ExtractionErrorKind::OcrTimeout)),
                ],
            })
            .await
            .unwrap();

        let mut state = ItemState::new();
        for stage in [Stage::Downloaded, Stage::Extracted, Stage::Chunked, Stage::Detected, Stage::Done] {
            state.advance(stage).unwrap();
        }
        let mut states = StateMap::new();
        states.insert(item.id.clone(), state);
        let ingestion = IngestionResult {
            records: vec![item.clone()],
            ..Default::default()
        };

        let report = RunReport::build(metadata(), &ingestion, &states, &artifacts).await;
        let units = &report.items[0].units;
        assert_eq!(units.len(), 3);
        assert!(!units[0].is_annotated());
        assert_eq!(units[1].chars, 0);
        assert_eq!(units[1].error_kind, None);
        assert_eq!(units[2].error_kind, Some(ExtractionErrorKind::OcrTimeout));
        assert_eq!(units[2].source_method, SourceMethod::Native);

        let summary = report.render_summary();
        assert!(summary.contains("#1 (native): empty"));
        assert!(summary.contains("#2 (native): ocr_timeout"));
    }
}
