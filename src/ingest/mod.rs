// file: src/ingest/mod.rs
// description: input ingestion and source classification
// reference: internal module structure

pub mod ingestor;
pub mod resolver;

pub use ingestor::{DuplicateRow, IngestionResult, IngestionSummary, InputSource, LinkIngestor};
pub use resolver::{ResolverRule, SourceResolver};
