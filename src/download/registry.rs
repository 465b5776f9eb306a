// file: src/download/registry.rs
// description: source kind to fetch strategy dispatch table
// reference: internal module structure

use crate::download::fetchers::{
    HttpFetcher, LocalFetcher, SourceFetcher, rewrite_box, rewrite_dropbox, rewrite_google_drive,
    rewrite_sharepoint,
};
use crate::error::{PipelineError, Result};
use crate::models::SourceKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<SourceKind, Arc<dyn SourceFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in strategies for every known source kind.
    pub fn with_defaults(connect_timeout: Duration, chunk_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("GraveKeeper/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        let mut registry = Self::new();
        registry.register(
            SourceKind::Box,
            Arc::new(HttpFetcher::with_rewrite(client.clone(), rewrite_box)),
        );
        registry.register(
            SourceKind::GoogleDrive,
            Arc::new(HttpFetcher::with_rewrite(client.clone(), rewrite_google_drive)),
        );
        registry.register(
            SourceKind::Sharepoint,
            Arc::new(HttpFetcher::with_rewrite(client.clone(), rewrite_sharepoint)),
        );
        registry.register(
            SourceKind::Onedrive,
            Arc::new(HttpFetcher::with_rewrite(client.clone(), rewrite_sharepoint)),
        );
        registry.register(
            SourceKind::Dropbox,
            Arc::new(HttpFetcher::with_rewrite(client.clone(), rewrite_dropbox)),
        );
        registry.register(SourceKind::GenericHttp, Arc::new(HttpFetcher::new(client)));
        registry.register(SourceKind::LocalFile, Arc::new(LocalFetcher::new(chunk_bytes)));

        Ok(registry)
    }

    pub fn register(&mut self, kind: SourceKind, fetcher: Arc<dyn SourceFetcher>) {
        self.fetchers.insert(kind, fetcher);
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceFetcher>> {
        self.fetchers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}
