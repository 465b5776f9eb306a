// file: src/lib.rs
// description: library entry point and public api exports
// reference: rust library patterns

//! Resumable pipeline that ingests document links, downloads and extracts them,
//! and flags sensitive content with heuristics and an AI model.

pub mod config;
pub mod detection;
pub mod download;
pub mod error;
pub mod extraction;
pub mod ingest;
pub mod models;
pub mod pipeline;
pub mod processing;
pub mod utils;

pub use config::{
    Config, DetectionConfig, DownloadConfig, ExtractionConfig, InputConfig, PipelineConfig,
    ProcessingConfig, ProviderConfig,
};
pub use detection::{DetectionEngine, HeuristicDetector, ProviderRegistry};
pub use download::{Downloader, FetcherRegistry};
pub use error::{PipelineError, Result};
pub use extraction::ExtractionRouter;
pub use ingest::{IngestionResult, InputSource, LinkIngestor, SourceResolver};
pub use models::{Finding, ItemState, LinkRecord, Stage};
pub use pipeline::{
    PipelineComponents, PipelineOrchestrator, PipelineStats, ProgressTracker, RunOutcome,
    RunReport, spawn_ctrl_c_listener,
};
pub use processing::TextChunker;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let config = Config::default_config();
        let _chunker = TextChunker::new(config.processing.chunk_size);
        let _resolver = SourceResolver::default();
        assert!(ProviderRegistry::with_defaults().keys().contains(&"ollama".to_string()));
    }
}
