// file: src/download/downloader.rs
// description: retrying, size-bounded streaming download into the files directory
// reference: https://docs.rs/tokio/latest/tokio/time/fn.timeout.html

use crate::config::Config;
use crate::download::fetchers::{AuthContext, SourceFetcher};
use crate::download::registry::FetcherRegistry;
use crate::error::{DownloadError, DownloadErrorKind, PipelineError, Result};
use crate::models::{DownloadResult, LinkRecord, SourceKind};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}

/// Failure of one attempt. `Fatal` aborts the run instead of the item.
enum AttemptError {
    Item(DownloadError),
    Fatal(PipelineError),
}

impl From<DownloadError> for AttemptError {
    fn from(err: DownloadError) -> Self {
        AttemptError::Item(err)
    }
}

struct Fetched {
    path: PathBuf,
    size: u64,
    hash: String,
}

pub struct Downloader {
    registry: FetcherRegistry,
    files_dir: PathBuf,
    max_bytes: u64,
    attempt_timeout: Duration,
    retry: RetryPolicy,
    auth: HashMap<SourceKind, AuthContext>,
}

impl Downloader {
    pub fn new(
        registry: FetcherRegistry,
        files_dir: PathBuf,
        max_bytes: u64,
        attempt_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            files_dir,
            max_bytes,
            attempt_timeout,
            retry,
            auth: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config, registry: FetcherRegistry, files_dir: PathBuf) -> Self {
        let download = &config.download;
        let mut downloader = Self::new(
            registry,
            files_dir,
            config.max_file_size_bytes(),
            Duration::from_secs(download.timeout_secs),
            RetryPolicy {
                max_retries: download.max_retries,
                base_delay: Duration::from_millis(download.base_delay_ms),
                max_backoff: Duration::from_millis(download.max_backoff_ms),
            },
        );

        for kind in [
            SourceKind::Box,
            SourceKind::Sharepoint,
            SourceKind::Onedrive,
            SourceKind::GoogleDrive,
            SourceKind::Dropbox,
            SourceKind::GenericHttp,
        ] {
            if let Some(token) = config.auth_token(kind) {
                downloader.set_auth(kind, AuthContext::bearer(token));
            }
        }
        downloader
    }

    pub fn set_auth(&mut self, kind: SourceKind, auth: AuthContext) {
        self.auth.insert(kind, auth);
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Returns the item-level outcome. `Err` is reserved for run-fatal conditions.
    pub async fn download(&self, record: &LinkRecord) -> Result<DownloadResult> {
        let Some(fetcher) = self.registry.get(record.source_kind) else {
            warn!("No fetch strategy for {} ({})", record.source_kind, record.id);
            return Ok(DownloadResult::failed(
                &record.id,
                DownloadErrorKind::Unknown,
                format!("unsupported share type: {}", record.source_kind),
                0,
            ));
        };

        tokio::fs::create_dir_all(&self.files_dir)
            .await
            .map_err(|e| PipelineError::file(&self.files_dir, e))?;

        let auth = self
            .auth
            .get(&record.source_kind)
            .cloned()
            .unwrap_or_default();

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!("Download attempt {} for {}", attempts, record.id);

            match self.attempt(fetcher.as_ref(), record, &auth).await {
                Ok(fetched) => {
                    info!(
                        "Downloaded {} ({} bytes, {} attempt(s))",
                        record.file_name, fetched.size, attempts
                    );
                    return Ok(DownloadResult::success(
                        &record.id,
                        fetched.path,
                        fetched.size,
                        fetched.hash,
                        attempts,
                    ));
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Item(err)) => {
                    if err.transient && attempts <= self.retry.max_retries {
                        let delay = self.retry.delay_for(attempts);
                        warn!(
                            "Transient download error for {} ({}), retrying in {:?}",
                            record.id, err, delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!("Download failed for {}: {}", record.id, err);
                    return Ok(DownloadResult::failed(
                        &record.id,
                        err.kind,
                        err.message,
                        attempts,
                    ));
                }
            }
        }
    }

    async fn attempt(
        &self,
        fetcher: &dyn SourceFetcher,
        record: &LinkRecord,
        auth: &AuthContext,
    ) -> std::result::Result<Fetched, AttemptError> {
        let part_path = self.files_dir.join(format!("{}.part", record.id));

        let outcome = tokio::time::timeout(
            self.attempt_timeout,
            self.transfer(fetcher, record, auth, &part_path),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AttemptError::Item(DownloadError::new(
                DownloadErrorKind::Timeout,
                format!("attempt exceeded {:?}", self.attempt_timeout),
            )))
        });

        match outcome {
            Ok((size, hash)) => {
                let final_path = self
                    .files_dir
                    .join(format!("{}{}", record.id, record.extension()));
                if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
                    let _ = tokio::fs::remove_file(&part_path).await;
                    return Err(write_error(&final_path, e));
                }
                Ok(Fetched {
                    path: final_path,
                    size,
                    hash,
                })
            }
            Err(err) => {
                if tokio::fs::try_exists(&part_path).await.unwrap_or(false) {
                    let _ = tokio::fs::remove_file(&part_path).await;
                }
                Err(err)
            }
        }
    }

    async fn transfer(
        &self,
        fetcher: &dyn SourceFetcher,
        record: &LinkRecord,
        auth: &AuthContext,
        part_path: &Path,
    ) -> std::result::Result<(u64, String), AttemptError> {
        let mut response = fetcher.open(&record.normalized_reference, auth).await?;

        if let Some(declared) = response.content_length
            && declared > self.max_bytes
        {
            return Err(too_large(declared, self.max_bytes).into());
        }

        let mut file = tokio::fs::File::create(part_path)
            .await
            .map_err(|e| write_error(part_path, e))?;
        let mut hasher = Sha256::new();
        let mut total: u64 = 0;

        while let Some(chunk) = response.stream.next().await {
            let chunk = chunk?;
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Err(too_large(total, self.max_bytes).into());
            }
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| write_error(part_path, e))?;
        }

        file.flush().await.map_err(|e| write_error(part_path, e))?;
        file.sync_all().await.map_err(|e| write_error(part_path, e))?;

        Ok((total, format!("{:x}", hasher.finalize())))
    }
}

fn too_large(seen: u64, limit: u64) -> DownloadError {
    DownloadError::permanent(
        DownloadErrorKind::TooLarge,
        format!("{} bytes exceeds limit of {} bytes", seen, limit),
    )
}

fn write_error(path: &Path, err: std::io::Error) -> AttemptError {
    match PipelineError::file(path, err) {
        fatal @ PipelineError::ResourceExhausted(_) => AttemptError::Fatal(fatal),
        other => AttemptError::Item(DownloadError::permanent(
            DownloadErrorKind::Unknown,
            other.to_string(),
        )),
    }
}

/// Finds an already present `<files>/<link_id>.*` file for `skip_download`.
pub fn find_existing_file(files_dir: &Path, link_id: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(files_dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|path| {
            path.is_file()
                && path.file_stem().and_then(|s| s.to_str()) == Some(link_id)
                && path.extension().and_then(|e| e.to_str()) != Some("part")
        })
}

/// Builds a success result for a file adopted from disk.
pub async fn adopt_file(link_id: &str, path: PathBuf) -> Result<DownloadResult> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| PipelineError::file(&path, e))?;
    let hash = format!("{:x}", Sha256::digest(&bytes));
    Ok(DownloadResult::success(
        link_id,
        path,
        bytes.len() as u64,
        hash,
        0,
    ))
}
