// file: src/models/mod.rs
// description: data models module exports
// reference: internal data structures

pub mod chunk;
pub mod download;
pub mod extraction;
pub mod finding;
pub mod link;
pub mod state;

pub use chunk::TextChunk;
pub use download::{DownloadResult, DownloadStatus};
pub use extraction::{
    ExtractionResult, ExtractionStatus, ExtractionUnit, FileFormat, SourceMethod, UnitKind,
};
pub use finding::{Category, ChunkDetection, DetectionResult, Finding, FindingSource};
pub use link::{LinkRecord, SourceKind};
pub use state::{ItemState, ItemStatus, Stage, Transition};
