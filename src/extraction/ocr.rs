// file: src/extraction/ocr.rs
// description: ocr and pdf page rendering through external command line tools
// reference: https://docs.rs/tokio/latest/tokio/process/index.html

use crate::error::{ExtractionError, ExtractionErrorKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(
        &self,
        image: &[u8],
        language: &str,
        timeout: Duration,
    ) -> Result<String, ExtractionError>;
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders every page to PNG, in page order.
    async fn render_pages(&self, pdf: &[u8], timeout: Duration)
    -> Result<Vec<Vec<u8>>, ExtractionError>;
}

pub struct TesseractOcr {
    binary: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(
        &self,
        image: &[u8],
        language: &str,
        timeout: Duration,
    ) -> Result<String, ExtractionError> {
        let workdir = scratch_dir()?;
        let image_path = workdir.path().join("input.img");
        write_input(&image_path, image).await?;

        let mut command = Command::new(&self.binary);
        command
            .arg(&image_path)
            .arg("stdout")
            .args(["-l", language, "--psm", "6"]);

        let output = run_with_timeout(command, timeout, &self.binary).await?;
        let text = String::from_utf8_lossy(&output.stdout).to_string();
        debug!("tesseract recognized {} characters", text.len());
        Ok(text)
    }
}

pub struct PdftoppmRenderer {
    binary: String,
    dpi: u32,
}

impl PdftoppmRenderer {
    pub fn new(binary: impl Into<String>, dpi: u32) -> Self {
        Self {
            binary: binary.into(),
            dpi,
        }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render_pages(
        &self,
        pdf: &[u8],
        timeout: Duration,
    ) -> Result<Vec<Vec<u8>>, ExtractionError> {
        let workdir = scratch_dir()?;
        let pdf_path = workdir.path().join("input.pdf");
        write_input(&pdf_path, pdf).await?;

        let prefix = workdir.path().join("page");
        let mut command = Command::new(&self.binary);
        command
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(&pdf_path)
            .arg(&prefix);

        run_with_timeout(command, timeout, &self.binary).await?;

        let mut images: Vec<PathBuf> = std::fs::read_dir(workdir.path())
            .map_err(|e| ExtractionError::new(ExtractionErrorKind::OcrFailed, e.to_string()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        images.sort();

        let mut pages = Vec::with_capacity(images.len());
        for path in images {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ExtractionError::new(ExtractionErrorKind::OcrFailed, e.to_string()))?;
            pages.push(bytes);
        }
        debug!("pdftoppm rendered {} page(s)", pages.len());
        Ok(pages)
    }
}

fn scratch_dir() -> Result<tempfile::TempDir, ExtractionError> {
    tempfile::Builder::new()
        .prefix("gravekeeper-ocr-")
        .tempdir()
        .map_err(|e| ExtractionError::new(ExtractionErrorKind::OcrFailed, e.to_string()))
}

async fn write_input(path: &Path, bytes: &[u8]) -> Result<(), ExtractionError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| ExtractionError::new(ExtractionErrorKind::OcrFailed, e.to_string()))
}

/// The child is killed when the timeout drops the pending future.
async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    binary: &str,
) -> Result<Output, ExtractionError> {
    command.kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| {
            ExtractionError::new(
                ExtractionErrorKind::OcrTimeout,
                format!("{} exceeded {:?}", binary, timeout),
            )
        })?
        .map_err(|e| {
            ExtractionError::new(
                ExtractionErrorKind::OcrFailed,
                format!("failed to run {}: {}", binary, e),
            )
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractionError::new(
            ExtractionErrorKind::OcrFailed,
            format!("{} exited with {}: {}", binary, output.status, stderr.trim()),
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_ocr_failure() {
        let ocr = TesseractOcr::new("gravekeeper-test-no-such-binary");
        let err = ocr
            .recognize(b"\x89PNG", "eng", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::OcrFailed);
    }

    #[tokio::test]
    async fn test_missing_renderer_is_ocr_failure() {
        let renderer = PdftoppmRenderer::new("gravekeeper-test-no-such-binary", 150);
        let err = renderer
            .render_pages(b"%PDF-1.4", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ExtractionErrorKind::OcrFailed);
    }
}
