// file: src/detection/mod.rs
// description: detection module exports
// reference: internal module structure

pub mod engine;
pub mod heuristics;
pub mod merge;
pub mod patterns;
pub mod providers;

pub use engine::{ChunkOutcome, DetectionEngine};
pub use heuristics::{HeuristicDetector, HeuristicRule};
pub use merge::{merge_findings, normalize_span, rank_findings};
pub use providers::{AiProvider, AiSpan, DetectionContext, OllamaProvider, ProviderRegistry};
