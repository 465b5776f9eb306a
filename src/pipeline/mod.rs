// file: src/pipeline/mod.rs
// description: pipeline module exports and public api
// reference: pipeline orchestration

pub mod artifacts;
mod orchestrator;
mod progress;
pub mod report;
pub mod state;

pub use artifacts::ArtifactStore;
pub use orchestrator::{PipelineComponents, PipelineOrchestrator, RunOutcome, spawn_ctrl_c_listener};
pub use progress::{PipelineStats, ProgressTracker};
pub use report::RunReport;
pub use state::StateStore;
