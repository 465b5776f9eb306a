// file: src/processing/mod.rs
// description: text preparation ahead of detection
// reference: internal module structure

pub mod chunker;

pub use chunker::{ChunkingSummary, TextChunker};
