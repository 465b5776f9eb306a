// file: src/extraction/router.rs
// description: per-format extraction strategy selection and native/ocr combination
// reference: https://docs.rs/tokio/latest/tokio/sync/struct.Semaphore.html

use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, ExtractionErrorKind};
use crate::extraction::format::detect_format;
use crate::extraction::native::{DocumentParser, NativeParser, ParsedText};
use crate::extraction::ocr::{OcrEngine, PageRenderer, PdftoppmRenderer, TesseractOcr};
use crate::models::{
    DownloadResult, ExtractionResult, ExtractionStatus, ExtractionUnit, FileFormat, LinkRecord,
    SourceMethod, UnitKind,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub pdf_ocr: bool,
    pub language: String,
    pub ocr_timeout: Duration,
}

impl From<&ExtractionConfig> for ExtractionSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            pdf_ocr: config.pdf_ocr,
            language: config.ocr_language.clone(),
            ocr_timeout: Duration::from_secs(config.ocr_timeout_secs),
        }
    }
}

/// Per-page OCR outcome; `Err` keeps only the failure kind.
type OcrPage = Result<String, ExtractionErrorKind>;

pub struct ExtractionRouter {
    parser: Arc<dyn DocumentParser>,
    ocr: Arc<dyn OcrEngine>,
    renderer: Arc<dyn PageRenderer>,
    cpu: Arc<Semaphore>,
    settings: ExtractionSettings,
}

impl ExtractionRouter {
    pub fn new(
        parser: Arc<dyn DocumentParser>,
        ocr: Arc<dyn OcrEngine>,
        renderer: Arc<dyn PageRenderer>,
        settings: ExtractionSettings,
        cpu_slots: usize,
    ) -> Self {
        let slots = if cpu_slots == 0 {
            num_cpus::get()
        } else {
            cpu_slots
        };

        Self {
            parser,
            ocr,
            renderer,
            cpu: Arc::new(Semaphore::new(slots.max(1))),
            settings,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(
            Arc::new(NativeParser::new()),
            Arc::new(TesseractOcr::new(config.tesseract_bin.clone())),
            Arc::new(PdftoppmRenderer::new(
                config.pdftoppm_bin.clone(),
                config.render_dpi,
            )),
            ExtractionSettings::from(config),
            config.cpu_workers,
        )
    }

    pub async fn extract(
        &self,
        record: &LinkRecord,
        download: &DownloadResult,
        skip_ocr: bool,
    ) -> ExtractionResult {
        let path = match (&download.local_path, download.is_success()) {
            (Some(path), true) => path.clone(),
            _ => {
                return ExtractionResult::failed(
                    &record.id,
                    FileFormat::Unknown,
                    ExtractionErrorKind::CorruptFile,
                    "no downloaded file".to_string(),
                );
            }
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                return ExtractionResult::failed(
                    &record.id,
                    FileFormat::Unknown,
                    ExtractionErrorKind::CorruptFile,
                    format!("cannot read {}: {}", path.display(), e),
                );
            }
        };

        let mut extension = record.extension();
        if extension.is_empty() {
            extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
        }
        let format = detect_format(&extension, &bytes);
        debug!("Detected {} for {}", format.as_str(), record.file_name);

        let units = match format {
            FileFormat::PlainText
            | FileFormat::Csv
            | FileFormat::Spreadsheet
            | FileFormat::WordDocument => self.extract_native(&record.id, bytes, format).await,
            FileFormat::Pdf => self.extract_pdf(&record.id, bytes, skip_ocr).await,
            FileFormat::Image => Ok(vec![self.extract_image(&record.id, &bytes, skip_ocr).await]),
            FileFormat::Presentation | FileFormat::Unknown => {
                info!(
                    "Skipping {} ({}): unsupported format",
                    record.file_name,
                    format.as_str()
                );
                return ExtractionResult::skipped(
                    &record.id,
                    format,
                    ExtractionErrorKind::UnsupportedFormat,
                );
            }
        };

        match units {
            Ok(units) if units.is_empty() => {
                warn!("No extractable content in {}", record.file_name);
                ExtractionResult::failed(
                    &record.id,
                    format,
                    ExtractionErrorKind::CorruptFile,
                    "no extractable content".to_string(),
                )
            }
            Ok(units) => {
                info!(
                    "Extracted {} unit(s) from {} ({})",
                    units.len(),
                    record.file_name,
                    format.as_str()
                );
                ExtractionResult {
                    link_id: record.id.clone(),
                    format,
                    status: ExtractionStatus::Success,
                    units,
                }
            }
            Err(err) => {
                warn!("Extraction failed for {}: {}", record.file_name, err);
                ExtractionResult::failed(&record.id, format, err.kind, err.message)
            }
        }
    }

    async fn parse_native(
        &self,
        bytes: Bytes,
        format: FileFormat,
    ) -> Result<ParsedText, ExtractionError> {
        let _permit = self.cpu.acquire().await.ok();
        let parser = self.parser.clone();

        tokio::task::spawn_blocking(move || parser.parse(&bytes, format))
            .await
            .map_err(|e| ExtractionError::corrupt(format!("parser task failed: {}", e)))?
    }

    async fn recognize(&self, image: &[u8]) -> Result<String, ExtractionError> {
        let _permit = self.cpu.acquire().await.ok();
        self.ocr
            .recognize(image, &self.settings.language, self.settings.ocr_timeout)
            .await
    }

    async fn extract_native(
        &self,
        link_id: &str,
        bytes: Bytes,
        format: FileFormat,
    ) -> Result<Vec<ExtractionUnit>, ExtractionError> {
        let units = match self.parse_native(bytes, format).await? {
            ParsedText::Whole(text) => {
                vec![unit(link_id, 0, UnitKind::FullText, text, SourceMethod::Native, None)]
            }
            ParsedText::Pages(pages) => pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| unit(link_id, i, UnitKind::Page, text, SourceMethod::Native, None))
                .collect(),
        };
        Ok(units)
    }

    async fn extract_image(&self, link_id: &str, bytes: &[u8], skip_ocr: bool) -> ExtractionUnit {
        if skip_ocr {
            return unit(
                link_id,
                0,
                UnitKind::Image,
                String::new(),
                SourceMethod::Ocr,
                Some(ExtractionErrorKind::OcrSkipped),
            );
        }

        match self.recognize(bytes).await {
            Ok(text) => unit(
                link_id,
                0,
                UnitKind::Image,
                text.trim().to_string(),
                SourceMethod::Ocr,
                None,
            ),
            Err(err) => {
                warn!("OCR failed for image {}: {}", link_id, err);
                unit(
                    link_id,
                    0,
                    UnitKind::Image,
                    String::new(),
                    SourceMethod::Ocr,
                    Some(err.kind),
                )
            }
        }
    }

    async fn ocr_pdf(&self, link_id: &str, bytes: &[u8], page_hint: usize) -> Vec<OcrPage> {
        let page_count = page_hint.max(1);
        let render_timeout = self.settings.ocr_timeout.saturating_mul(page_count as u32);

        let rendered = {
            let _permit = self.cpu.acquire().await.ok();
            self.renderer.render_pages(bytes, render_timeout).await
        };

        match rendered {
            Ok(images) => {
                let mut pages = Vec::with_capacity(images.len());
                for (index, image) in images.iter().enumerate() {
                    let page = self.recognize(image).await.map_err(|err| {
                        warn!("OCR failed on page {} of {}: {}", index + 1, link_id, err);
                        err.kind
                    });
                    pages.push(page);
                }
                pages
            }
            Err(err) => {
                warn!("Page rendering failed for {}: {}", link_id, err);
                vec![Err(err.kind); page_count]
            }
        }
    }

    async fn extract_pdf(
        &self,
        link_id: &str,
        bytes: Bytes,
        skip_ocr: bool,
    ) -> Result<Vec<ExtractionUnit>, ExtractionError> {
        let (native_pages, native_error) = match self.parse_native(bytes.clone(), FileFormat::Pdf).await
        {
            Ok(ParsedText::Pages(pages)) => (pages, None),
            Ok(ParsedText::Whole(text)) => (vec![text], None),
            Err(err) => {
                warn!("Native PDF parsing failed for {}: {}", link_id, err);
                (Vec::new(), Some(err))
            }
        };

        let run_ocr = self.settings.pdf_ocr && !skip_ocr;
        let ocr_pages = if run_ocr {
            self.ocr_pdf(link_id, &bytes, native_pages.len()).await
        } else {
            Vec::new()
        };

        if let Some(err) = native_error {
            let any_ocr_text = ocr_pages
                .iter()
                .any(|page| matches!(page, Ok(text) if !text.trim().is_empty()));
            if !any_ocr_text {
                return Err(err);
            }
        }

        let page_count = native_pages.len().max(ocr_pages.len());
        let units = (0..page_count)
            .map(|index| {
                let native = native_pages
                    .get(index)
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty());
                let ocr = ocr_pages.get(index);
                let ocr_text = match ocr {
                    Some(Ok(text)) if !text.trim().is_empty() => Some(text.trim()),
                    _ => None,
                };

                let (text, method, error_kind) = match (native, ocr_text) {
                    (Some(n), Some(o)) => (combine_texts(n, o), SourceMethod::Both, None),
                    (Some(n), None) => {
                        let error_kind = match ocr {
                            Some(Err(kind)) => Some(*kind),
                            _ => None,
                        };
                        (n.to_string(), SourceMethod::Native, error_kind)
                    }
                    (None, Some(o)) => (o.to_string(), SourceMethod::Ocr, None),
                    (None, None) => {
                        let error_kind = match ocr {
                            Some(Err(kind)) => Some(*kind),
                            _ if skip_ocr && self.settings.pdf_ocr => {
                                Some(ExtractionErrorKind::OcrSkipped)
                            }
                            _ => None,
                        };
                        let method = if ocr.is_some() {
                            SourceMethod::Ocr
                        } else {
                            SourceMethod::Native
                        };
                        (String::new(), method, error_kind)
                    }
                };

                unit(link_id, index, UnitKind::Page, text, method, error_kind)
            })
            .collect();

        Ok(units)
    }
}

fn unit(
    link_id: &str,
    unit_index: usize,
    unit_kind: UnitKind,
    text: String,
    source_method: SourceMethod,
    error_kind: Option<ExtractionErrorKind>,
) -> ExtractionUnit {
    ExtractionUnit {
        link_id: link_id.to_string(),
        unit_index,
        unit_kind,
        text,
        source_method,
        error_kind,
    }
}

fn normalize_for_compare(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Native text, followed by the OCR text when it reads differently.
fn combine_texts(native: &str, ocr: &str) -> String {
    if normalize_for_compare(native) == normalize_for_compare(ocr) {
        native.to_string()
    } else {
        format!("{}\n\n{}", native, ocr)
    }
}
