// file: src/pipeline/orchestrator.rs
// description: drives every link through download, extraction, chunking and detection
// reference: orchestrates asynchronous per-item workflow with resumable state

use crate::config::Config;
use crate::detection::{DetectionEngine, ProviderRegistry};
use crate::download::{Downloader, FetcherRegistry, adopt_file, find_existing_file};
use crate::error::{DownloadErrorKind, ExtractionErrorKind, PipelineError, Result};
use crate::extraction::ExtractionRouter;
use crate::ingest::{IngestionResult, LinkIngestor};
use crate::models::{
    DetectionResult, DownloadResult, ExtractionResult, ExtractionStatus, FileFormat, ItemState,
    ItemStatus, LinkRecord, Stage, TextChunk,
};
use crate::pipeline::artifacts::ArtifactStore;
use crate::pipeline::progress::{PipelineStats, ProgressTracker};
use crate::pipeline::report::{RunMetadata, RunReport};
use crate::pipeline::state::StateStore;
use crate::processing::TextChunker;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The collaborators the orchestrator drives. Tests swap in scripted ones.
pub struct PipelineComponents {
    pub ingestor: LinkIngestor,
    pub downloader: Downloader,
    pub extractor: ExtractionRouter,
    pub chunker: TextChunker,
    pub detector: DetectionEngine,
}

impl PipelineComponents {
    pub fn from_config(config: &Config) -> Result<Self> {
        let artifacts = ArtifactStore::new(&config.pipeline.output_dir);
        let registry = FetcherRegistry::with_defaults(
            Duration::from_secs(config.download.timeout_secs),
            config.download.stream_chunk_bytes,
        )?;

        Ok(Self {
            ingestor: LinkIngestor::default(),
            downloader: Downloader::from_config(config, registry, artifacts.files_dir()),
            extractor: ExtractionRouter::from_config(&config.extraction),
            chunker: TextChunker::new(config.processing.chunk_size),
            detector: DetectionEngine::from_config(
                &config.detection,
                &ProviderRegistry::with_defaults(),
            )?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StageFlags {
    skip_download: bool,
    skip_ocr: bool,
    skip_ai: bool,
}

/// What a step decided for the item.
enum StepOutcome {
    Advance,
    Skip(String),
    Fail(String),
}

/// Results produced or reused so far for one item.
#[derive(Default)]
struct ItemContext {
    download: Option<DownloadResult>,
    extraction: Option<ExtractionResult>,
    chunks: Option<Vec<TextChunk>>,
    detection: Option<DetectionResult>,
    new_findings: usize,
}

struct ItemRunner {
    downloader: Downloader,
    extractor: ExtractionRouter,
    chunker: TextChunker,
    detector: DetectionEngine,
    artifacts: Arc<ArtifactStore>,
    flags: StageFlags,
}

struct ItemOutcome {
    state: ItemState,
    new_findings: usize,
}

pub struct PipelineOrchestrator {
    config: Config,
    ingestor: Arc<LinkIngestor>,
    runner: Arc<ItemRunner>,
    artifacts: Arc<ArtifactStore>,
    cancel: Arc<AtomicBool>,
    max_concurrent_tasks: usize,
    show_progress: bool,
    colored: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub stats: PipelineStats,
}

impl PipelineOrchestrator {
    pub fn new(config: Config) -> Result<Self> {
        let components = PipelineComponents::from_config(&config)?;
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: Config, components: PipelineComponents) -> Self {
        let artifacts = Arc::new(ArtifactStore::new(&config.pipeline.output_dir));
        let max_concurrent_tasks = config.pipeline.parallel_workers.max(1);

        let runner = ItemRunner {
            downloader: components.downloader,
            extractor: components.extractor,
            chunker: components.chunker,
            detector: components.detector,
            artifacts: artifacts.clone(),
            flags: StageFlags {
                skip_download: config.pipeline.skip_download,
                skip_ocr: config.pipeline.skip_ocr,
                skip_ai: config.pipeline.skip_ai,
            },
        };

        Self {
            config,
            ingestor: Arc::new(components.ingestor),
            runner: Arc::new(runner),
            artifacts,
            cancel: Arc::new(AtomicBool::new(false)),
            max_concurrent_tasks,
            show_progress: true,
            colored: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool, colored: bool) -> Self {
        self.show_progress = show_progress;
        self.colored = colored;
        self
    }

    /// Setting the flag stops dispatch of items that have not started yet.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        info!("Starting GraveKeeper pipeline");
        let started_at = chrono::Utc::now();
        let start = Instant::now();

        self.artifacts.init().await?;

        info!("Ingesting input...");
        let ingestion = self.ingest().await?;
        info!(
            "Ingested {} link(s): {} valid, {} duplicate(s), {} rejected",
            ingestion.summary.total_rows,
            ingestion.summary.valid_rows,
            ingestion.summary.duplicates,
            ingestion.rejected.len()
        );
        self.artifacts.save_ingestion(&ingestion).await?;

        let state = Arc::new(StateStore::load(self.artifacts.state_path()).await);
        for record in &ingestion.records {
            state.ensure(&record.id).await?;
        }

        if let Some(stage) = self.config.invalidation_stage() {
            self.invalidate(&state, &ingestion.records, stage).await?;
        }

        state.update_all(|_, item| item.reopen()).await?;

        let mut pending = Vec::new();
        for record in &ingestion.records {
            let state = state.get(&record.id).await.unwrap_or_default();
            if state.is_terminal() {
                debug!("Reusing {} result for {}", state.describe(), record.id);
            } else {
                pending.push(record.clone());
            }
        }
        info!(
            "{} item(s) to process, {} already complete",
            pending.len(),
            ingestion.records.len() - pending.len()
        );

        let progress = Arc::new(if self.show_progress {
            ProgressTracker::with_color(pending.len(), self.colored)
        } else {
            ProgressTracker::hidden(pending.len())
        });

        info!(
            "Processing items with {} concurrent tasks...",
            self.max_concurrent_tasks
        );
        self.process_items(pending, state.clone(), progress.clone()).await?;

        let stats = progress.get_stats();
        progress.finish();
        self.log_final_stats(&stats);

        let metadata = RunMetadata {
            run_id: Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: started_at.to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            duration_secs: start.elapsed().as_secs(),
            output_dir: self.artifacts.root().display().to_string(),
            models: self.runner.detector.models(),
            cancelled: self.cancel.load(Ordering::SeqCst),
        };
        let snapshot = state.snapshot().await;
        let report = RunReport::build(metadata, &ingestion, &snapshot, &self.artifacts).await;
        report.write(&self.artifacts).await?;
        info!("Report written to {}", self.artifacts.report_path().display());

        Ok(RunOutcome { report, stats })
    }

    async fn ingest(&self) -> Result<IngestionResult> {
        let input = self.config.input_source()?;
        let ingestor = self.ingestor.clone();

        tokio::task::spawn_blocking(move || ingestor.ingest(&input))
            .await
            .map_err(|e| PipelineError::Input(format!("Ingestion task failed: {}", e)))?
    }

    /// Drops the artifacts of `stage` onward and moves each item back to the stage before it.
    async fn invalidate(
        &self,
        state: &StateStore,
        records: &[LinkRecord],
        stage: Stage,
    ) -> Result<()> {
        let from = stage.max(Stage::Downloaded);
        let back_to = from.previous().unwrap_or(Stage::Queued);
        info!("Reprocessing from {} for {} item(s)", from.step_name(), records.len());

        for record in records {
            self.artifacts.invalidate(&record.id, from).await?;
            state
                .update(&record.id, |item| {
                    item.rewind(back_to, format!("reprocess from {}", from.step_name()));
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }

    async fn process_items(
        &self,
        records: Vec<LinkRecord>,
        state: Arc<StateStore>,
        progress: Arc<ProgressTracker>,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));

        let tasks = records.into_iter().map(|record| {
            let semaphore = semaphore.clone();
            let runner = self.runner.clone();
            let state = state.clone();
            let progress = progress.clone();
            let cancel = self.cancel.clone();

            async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }

                progress.set_message(record.file_name.clone());
                match runner.process(&record, &state).await {
                    Ok(outcome) => {
                        progress.add_findings(outcome.new_findings);
                        match &outcome.state.status {
                            ItemStatus::Done => progress.inc_done(),
                            ItemStatus::Skipped { .. } => progress.inc_skipped(),
                            ItemStatus::Failed { .. } | ItemStatus::Pending => {
                                progress.inc_failed()
                            }
                        }
                        Some(Ok(()))
                    }
                    Err(e) => {
                        progress.inc_failed();
                        error!("Fatal error while processing {}: {}", record.id, e);
                        cancel.store(true, Ordering::SeqCst);
                        Some(Err(e))
                    }
                }
            }
        });

        let results: Vec<Result<()>> = stream::iter(tasks)
            .buffer_unordered(self.max_concurrent_tasks)
            .filter_map(|result| async move { result })
            .collect()
            .await;

        match results.into_iter().find_map(|r| r.err()) {
            Some(fatal) => Err(fatal),
            None => Ok(()),
        }
    }

    fn log_final_stats(&self, stats: &PipelineStats) {
        info!("=== Pipeline Execution Summary ===");
        info!("Duration: {} seconds", stats.duration_secs);
        info!("Items done: {}", stats.items_done);
        info!("Items failed: {}", stats.items_failed);
        info!("Items skipped: {}", stats.items_skipped);
        info!("Success rate: {:.2}%", stats.success_rate());
        info!("Findings: {}", stats.findings);
        info!("Processing speed: {:.2} items/sec", stats.items_per_second());
        if self.cancel.load(Ordering::SeqCst) {
            warn!("Run cancelled; undispatched items remain pending");
        }
        info!("=================================");
    }
}

impl ItemRunner {
    /// Runs the remaining steps of one item. Item-level problems end in a
    /// failed state; `Err` is returned only for run-fatal conditions.
    async fn process(&self, record: &LinkRecord, store: &StateStore) -> Result<ItemOutcome> {
        let mut ctx = ItemContext::default();

        loop {
            let state = store.ensure(&record.id).await?;
            let Some(next) = state.stage.next().filter(|_| !state.is_terminal()) else {
                return Ok(ItemOutcome {
                    state,
                    new_findings: ctx.new_findings,
                });
            };

            let outcome = match self.run_step(next, record, &mut ctx).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{} failed at {}: {}", record.id, next.step_name(), e);
                    StepOutcome::Fail("io_error".to_string())
                }
            };

            let committed = match outcome {
                StepOutcome::Advance => store.update(&record.id, |s| s.advance(next)).await,
                StepOutcome::Skip(reason) => {
                    info!("Skipping {} ({}): {}", record.id, record.file_name, reason);
                    store
                        .update(&record.id, |s| {
                            s.skip(reason);
                            Ok(())
                        })
                        .await
                }
                StepOutcome::Fail(kind) => {
                    warn!(
                        "Item {} ({}) failed at {}: {}",
                        record.id,
                        record.file_name,
                        next.step_name(),
                        kind
                    );
                    store
                        .update(&record.id, |s| {
                            s.fail(next, kind);
                            Ok(())
                        })
                        .await
                }
            };

            match committed {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Could not record {} of {}: {}", next.step_name(), record.id, e);
                    let state = record_io_failure(store, &record.id, next).await?;
                    return Ok(ItemOutcome {
                        state,
                        new_findings: ctx.new_findings,
                    });
                }
            }
        }
    }

    async fn run_step(
        &self,
        next: Stage,
        record: &LinkRecord,
        ctx: &mut ItemContext,
    ) -> Result<StepOutcome> {
        match next {
            Stage::Queued => Ok(StepOutcome::Advance),
            Stage::Downloaded => {
                let download = self.download(record, ctx).await?;
                Ok(if download.is_success() {
                    StepOutcome::Advance
                } else {
                    let kind = download.error_kind.unwrap_or(DownloadErrorKind::Unknown);
                    StepOutcome::Fail(kind.as_str().to_string())
                })
            }
            Stage::Extracted => {
                let extraction = self.extraction(record, ctx).await?;
                Ok(match &extraction.status {
                    ExtractionStatus::Success => StepOutcome::Advance,
                    ExtractionStatus::Skipped { reason } => StepOutcome::Skip(reason.as_str().to_string()),
                    ExtractionStatus::Failed { kind, .. } => StepOutcome::Fail(kind.as_str().to_string()),
                })
            }
            Stage::Chunked => {
                self.chunks(record, ctx).await?;
                Ok(StepOutcome::Advance)
            }
            Stage::Detected => {
                self.detection(record, ctx).await?;
                Ok(StepOutcome::Advance)
            }
            Stage::Done => Ok(StepOutcome::Advance),
        }
    }

    async fn download(&self, record: &LinkRecord, ctx: &mut ItemContext) -> Result<DownloadResult> {
        if let Some(download) = &ctx.download {
            return Ok(download.clone());
        }

        let persisted = self
            .artifacts
            .load_download(&record.id)
            .await
            .filter(|d| d.is_reusable());

        let download = match persisted {
            Some(download) => {
                debug!("Reusing download of {}", record.id);
                download
            }
            None => {
                let fresh = if self.flags.skip_download {
                    match find_existing_file(&self.artifacts.files_dir(), &record.id) {
                        Some(path) => {
                            debug!("Adopting existing file {}", path.display());
                            adopt_file(&record.id, path).await?
                        }
                        None => DownloadResult::failed(
                            &record.id,
                            DownloadErrorKind::NotFound,
                            "download skipped and no local file present".to_string(),
                            0,
                        ),
                    }
                } else {
                    self.downloader.download(record).await?
                };
                self.artifacts.invalidate(&record.id, Stage::Extracted).await?;
                self.artifacts.save_download(&fresh).await?;
                fresh
            }
        };

        ctx.download = Some(download.clone());
        Ok(download)
    }

    async fn extraction(
        &self,
        record: &LinkRecord,
        ctx: &mut ItemContext,
    ) -> Result<ExtractionResult> {
        if let Some(extraction) = &ctx.extraction {
            return Ok(extraction.clone());
        }

        let persisted = self
            .artifacts
            .load_extraction(&record.id)
            .await
            .filter(|e| !matches!(e.status, ExtractionStatus::Failed { .. }));

        let extraction = match persisted {
            Some(extraction) => {
                debug!("Reusing extraction of {}", record.id);
                extraction
            }
            None => {
                let download = self.download(record, ctx).await?;
                let fresh = if download.is_success() {
                    self.extractor
                        .extract(record, &download, self.flags.skip_ocr)
                        .await
                } else {
                    ExtractionResult::failed(
                        &record.id,
                        FileFormat::Unknown,
                        ExtractionErrorKind::CorruptFile,
                        "no successful download".to_string(),
                    )
                };
                self.artifacts.invalidate(&record.id, Stage::Chunked).await?;
                self.artifacts.save_extraction(&fresh).await?;
                fresh
            }
        };

        ctx.extraction = Some(extraction.clone());
        Ok(extraction)
    }

    async fn chunks(&self, record: &LinkRecord, ctx: &mut ItemContext) -> Result<Vec<TextChunk>> {
        if let Some(chunks) = &ctx.chunks {
            return Ok(chunks.clone());
        }

        let chunks = match self.artifacts.load_chunks(&record.id).await {
            Some(chunks) => {
                debug!("Reusing chunks of {}", record.id);
                chunks
            }
            None => {
                let extraction = self.extraction(record, ctx).await?;
                let fresh = self.chunker.chunk_units(&extraction.units);
                self.artifacts.invalidate(&record.id, Stage::Detected).await?;
                self.artifacts.save_chunks(&record.id, &fresh).await?;
                fresh
            }
        };

        ctx.chunks = Some(chunks.clone());
        Ok(chunks)
    }

    async fn detection(
        &self,
        record: &LinkRecord,
        ctx: &mut ItemContext,
    ) -> Result<DetectionResult> {
        if let Some(detection) = &ctx.detection {
            return Ok(detection.clone());
        }

        let detection = match self.artifacts.load_findings(&record.id).await {
            Some(detection) => {
                debug!("Reusing findings of {}", record.id);
                detection
            }
            None => {
                let chunks = self.chunks(record, ctx).await?;
                let extraction = self.extraction(record, ctx).await?;
                let image = if extraction.format == FileFormat::Image && !self.flags.skip_ai {
                    self.image_bytes(record, ctx).await?
                } else {
                    None
                };
                let fresh = self
                    .detector
                    .detect_chunks(
                        &record.id,
                        &record.file_name,
                        &extraction.units,
                        &chunks,
                        image,
                        self.flags.skip_ai,
                    )
                    .await;
                if fresh.degraded_chunks() > 0 {
                    warn!(
                        "{} of {} chunk(s) of {} were analyzed without every source",
                        fresh.degraded_chunks(),
                        fresh.chunks.len(),
                        record.id
                    );
                }
                self.artifacts.save_findings(&fresh).await?;
                ctx.new_findings += fresh.findings.len();
                fresh
            }
        };

        ctx.detection = Some(detection.clone());
        Ok(detection)
    }

    /// An unreadable file only costs the vision pass.
    async fn image_bytes(&self, record: &LinkRecord, ctx: &mut ItemContext) -> Result<Option<Bytes>> {
        let download = self.download(record, ctx).await?;
        if !download.is_success() {
            return Ok(None);
        }
        let Some(path) = download.local_path else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) => {
                warn!("Cannot read image {} for the vision model: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

/// Marks the item failed with `io_error`. The in-memory state stays authoritative
/// when the snapshot cannot be flushed.
async fn record_io_failure(store: &StateStore, link_id: &str, stage: Stage) -> Result<ItemState> {
    let marked = store
        .update(link_id, |s| {
            s.fail(stage, "io_error");
            Ok(())
        })
        .await;
    match marked {
        Ok(state) => Ok(state),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("State for {} kept in memory only: {}", link_id, e);
            Ok(store.get(link_id).await.unwrap_or_default())
        }
    }
}

/// Sets `flag` on the first Ctrl-C. Abort the handle once the run is over.
pub fn spawn_ctrl_c_listener(flag: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight items and stopping dispatch");
            flag.store(true, Ordering::SeqCst);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{AiProvider, AiSpan, DetectionContext, HeuristicDetector};
    use crate::download::{AuthContext, FetchResponse, RetryPolicy, SourceFetcher};
    use crate::error::{DetectionError, DetectionErrorKind, DownloadError, ExtractionError};
    use crate::extraction::{
        DocumentParser, ExtractionSettings, OcrEngine, PageRenderer, ParsedText,
    };
    use crate::models::{Category, FindingSource, SourceKind};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    const PAGE_TEXT: &str = "Invoice #4521, contact jane@acme.com";

    /// Serves a small PDF, except for references containing "missing".
    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SourceFetcher for CountingFetcher {
        async fn open(
            &self,
            reference: &str,
            _auth: &AuthContext,
        ) -> std::result::Result<FetchResponse, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if reference.contains("missing") {
                return Err(DownloadError::from_status(404, reference));
            }
            let mut body = b"%PDF-1.4\n".to_vec();
            body.resize(200, b' ');
            Ok(FetchResponse {
                content_length: Some(body.len() as u64),
                stream: stream::iter(vec![Ok(Bytes::from(body))]).boxed(),
            })
        }
    }

    struct PageParser;

    impl DocumentParser for PageParser {
        fn parse(
            &self,
            _bytes: &[u8],
            _format: FileFormat,
        ) -> std::result::Result<ParsedText, ExtractionError> {
            Ok(ParsedText::Pages(vec![PAGE_TEXT.to_string()]))
        }
    }

    struct EchoOcr;

    #[async_trait]
    impl OcrEngine for EchoOcr {
        async fn recognize(
            &self,
            _image: &[u8],
            _language: &str,
            _timeout: Duration,
        ) -> std::result::Result<String, ExtractionError> {
            Ok(PAGE_TEXT.to_string())
        }
    }

    struct OnePage;

    #[async_trait]
    impl PageRenderer for OnePage {
        async fn render_pages(
            &self,
            _pdf: &[u8],
            _timeout: Duration,
        ) -> std::result::Result<Vec<Vec<u8>>, ExtractionError> {
            Ok(vec![b"\x89PNG".to_vec()])
        }
    }

    struct EmailModel {
        reachable: bool,
    }

    #[async_trait]
    impl AiProvider for EmailModel {
        fn model(&self) -> String {
            "llama3.1".to_string()
        }

        async fn analyze(
            &self,
            _text: &str,
            _context: &DetectionContext,
        ) -> std::result::Result<Vec<AiSpan>, DetectionError> {
            if !self.reachable {
                return Err(DetectionError::new(
                    DetectionErrorKind::ProviderUnreachable,
                    "connection refused",
                ));
            }
            Ok(vec![AiSpan {
                category: Category::Email,
                span: "jane@acme.com".to_string(),
                confidence: 0.95,
            }])
        }
    }

    fn config(root: &Path, rows: &[&str]) -> Config {
        let csv_path = root.join("links.csv");
        let mut csv = String::from("link,owner\n");
        for row in rows {
            csv.push_str(&format!("{},finance\n", row));
        }
        std::fs::write(&csv_path, csv).unwrap();

        let mut config = Config::default_config();
        config.input.csv_file = Some(csv_path);
        config.pipeline.output_dir = root.join("out");
        config.pipeline.parallel_workers = 2;
        config
    }

    fn components(config: &Config, calls: Arc<AtomicUsize>, reachable: bool) -> PipelineComponents {
        let fetcher: Arc<dyn SourceFetcher> = Arc::new(CountingFetcher { calls });
        let mut registry = FetcherRegistry::new();
        registry.register(SourceKind::Box, fetcher.clone());
        registry.register(SourceKind::GenericHttp, fetcher);

        let downloader = Downloader::new(
            registry,
            config.pipeline.output_dir.join("files"),
            config.max_file_size_bytes(),
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
        );
        let extractor = ExtractionRouter::new(
            Arc::new(PageParser),
            Arc::new(EchoOcr),
            Arc::new(OnePage),
            ExtractionSettings {
                pdf_ocr: true,
                language: "eng".to_string(),
                ocr_timeout: Duration::from_secs(5),
            },
            2,
        );

        PipelineComponents {
            ingestor: LinkIngestor::default(),
            downloader,
            extractor,
            chunker: TextChunker::new(config.processing.chunk_size),
            detector: DetectionEngine::new(
                HeuristicDetector::default(),
                Some(Arc::new(EmailModel { reachable })),
                None,
            ),
        }
    }

    fn orchestrator(config: &Config, calls: Arc<AtomicUsize>, reachable: bool) -> PipelineOrchestrator {
        PipelineOrchestrator::with_components(config.clone(), components(config, calls, reachable))
            .with_progress(false, false)
    }

    #[tokio::test]
    async fn test_box_pdf_yields_one_merged_finding() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), &["https://box.com/s/abc123"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = orchestrator(&config, calls.clone(), true).run().await.unwrap();
        let report = outcome.report;

        assert_eq!(report.counts.done, 1);
        assert_eq!(report.counts.failed, 0);
        assert_eq!(report.findings.len(), 1);

        let finding = &report.findings[0];
        assert_eq!(finding.category, Category::Email);
        assert_eq!(finding.matched_text, "jane@acme.com");
        assert_eq!(
            finding.sources,
            vec![
                FindingSource::Ai("llama3.1".to_string()),
                FindingSource::Heuristic("email".to_string()),
            ]
        );
        assert_eq!(report.extraction.by_method.get("both"), Some(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(config.pipeline.output_dir.join("report.json").exists());
        assert!(config.pipeline.output_dir.join("summary.txt").exists());
    }

    #[tokio::test]
    async fn test_unreachable_model_degrades_and_failures_stay_isolated() {
        let dir = tempdir().unwrap();
        let config = config(
            dir.path(),
            &["https://example.com/a.pdf", "https://example.com/missing.pdf"],
        );

        let outcome = orchestrator(&config, Arc::new(AtomicUsize::new(0)), false)
            .run()
            .await
            .unwrap();
        let report = outcome.report;

        assert_eq!(report.counts.done, 1);
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.failed_by_step.get("download"), Some(&1));
        assert_eq!(report.detection.degraded_chunks, 1);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(
            report.findings[0].sources,
            vec![FindingSource::Heuristic("email".to_string())]
        );

        let failed = report
            .items
            .iter()
            .find(|item| item.reference.contains("missing"))
            .unwrap();
        assert_eq!(failed.status, "failed(download, not_found)");
        assert_eq!(outcome.stats.items_done + outcome.stats.items_failed, 2);
    }

    #[tokio::test]
    async fn test_rerun_reuses_artifacts() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), &["https://box.com/s/abc123"]);
        let calls = Arc::new(AtomicUsize::new(0));

        orchestrator(&config, calls.clone(), true).run().await.unwrap();
        let artifacts = ArtifactStore::new(&config.pipeline.output_dir);
        let id = LinkRecord::compute_id("https://box.com/s/abc123");
        let first = artifacts.load_extraction(&id).await.unwrap();

        let outcome = orchestrator(&config, calls.clone(), true).run().await.unwrap();
        assert_eq!(outcome.stats.items_finished(), 0);
        assert_eq!(outcome.report.counts.done, 1);

        config.pipeline.skip_download = true;
        config.pipeline.reprocess_from = Some(Stage::Extracted);
        let outcome = orchestrator(&config, calls.clone(), true).run().await.unwrap();
        assert_eq!(outcome.report.counts.done, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = artifacts.load_extraction(&id).await.unwrap();
        assert_eq!(second.units, first.units);

        let state = StateStore::load(artifacts.state_path()).await;
        let item = state.get(&id).await.unwrap();
        assert!(
            item.history
                .iter()
                .any(|t| t.note.as_deref() == Some("reprocess from extract"))
        );
    }

    #[tokio::test]
    async fn test_skip_download_without_file_fails_not_found() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), &["https://example.com/a.pdf"]);
        config.pipeline.skip_download = true;
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = orchestrator(&config, calls.clone(), true).run().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.report.items[0].status, "failed(download, not_found)");
    }

    #[tokio::test]
    async fn test_every_item_reaches_a_terminal_state() {
        let dir = tempdir().unwrap();
        let config = config(
            dir.path(),
            &[
                "https://example.com/a.pdf",
                "https://example.com/b.pdf",
                "https://example.com/missing.pdf",
                "not a url",
                "https://example.com/a.pdf",
            ],
        );

        let outcome = orchestrator(&config, Arc::new(AtomicUsize::new(0)), true)
            .run()
            .await
            .unwrap();
        let report = outcome.report;

        assert_eq!(report.items.len(), 3);
        assert_eq!(report.counts.pending, 0);
        assert_eq!(report.counts.done + report.counts.failed + report.counts.skipped, 3);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.duplicates.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), &["https://example.com/a.pdf"]);
        let calls = Arc::new(AtomicUsize::new(0));

        let orchestrator = orchestrator(&config, calls.clone(), true);
        orchestrator.cancellation_flag().store(true, Ordering::SeqCst);
        let outcome = orchestrator.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.report.counts.pending, 1);
        assert!(outcome.report.run.cancelled);
    }

    #[tokio::test]
    async fn test_state_flush_failure_fails_only_that_item() {
        let dir = tempdir().unwrap();
        let config = config(dir.path(), &[]);
        let orchestrator = orchestrator(&config, Arc::new(AtomicUsize::new(0)), true);
        orchestrator.artifacts.init().await.unwrap();

        let reference = "https://example.com/a.pdf".to_string();
        let record = LinkRecord::new(
            0,
            reference.clone(),
            reference,
            SourceKind::GenericHttp,
            Some("a.pdf".to_string()),
            Default::default(),
        );

        let state_path = dir.path().join("state.json");
        let store = StateStore::load(&state_path).await;
        store.ensure(&record.id).await.unwrap();
        std::fs::remove_file(&state_path).unwrap();
        std::fs::create_dir(&state_path).unwrap();

        let outcome = orchestrator.runner.process(&record, &store).await.unwrap();
        assert!(outcome.state.is_failed());
        assert_eq!(outcome.state.error_kind.as_deref(), Some("io_error"));
        assert!(store.get(&record.id).await.unwrap().is_failed());
    }

    #[tokio::test]
    async fn test_missing_csv_is_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path(), &[]);
        config.input.csv_file = Some(dir.path().join("nope.csv"));

        let err = orchestrator(&config, Arc::new(AtomicUsize::new(0)), true)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input(_)));
    }
}
