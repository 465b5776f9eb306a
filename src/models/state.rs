// file: src/models/state.rs
// description: per-item stage machine persisted between runs
// reference: internal data structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Committed stage of an item. Ordering follows the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Downloaded,
    Extracted,
    Chunked,
    Detected,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Queued,
        Stage::Downloaded,
        Stage::Extracted,
        Stage::Chunked,
        Stage::Detected,
        Stage::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Downloaded => "downloaded",
            Stage::Extracted => "extracted",
            Stage::Chunked => "chunked",
            Stage::Detected => "detected",
            Stage::Done => "done",
        }
    }

    /// Name of the step that produces this stage.
    pub fn step_name(&self) -> &'static str {
        match self {
            Stage::Queued => "ingest",
            Stage::Downloaded => "download",
            Stage::Extracted => "extract",
            Stage::Chunked => "chunk",
            Stage::Detected => "detect",
            Stage::Done => "report",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Downloaded),
            Stage::Downloaded => Some(Stage::Extracted),
            Stage::Extracted => Some(Stage::Chunked),
            Stage::Chunked => Some(Stage::Detected),
            Stage::Detected => Some(Stage::Done),
            Stage::Done => None,
        }
    }

    pub fn previous(&self) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s.next() == Some(*self))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    /// Accepts both the stage name (`extracted`) and its step name (`extract`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == key || stage.step_name() == key)
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Done,
    Skipped { reason: String },
    /// `stage` is the stage the item was attempting to reach.
    Failed { stage: Stage },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
    pub at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub stage: Stage,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub started_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub history: Vec<Transition>,
}

impl Default for ItemState {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemState {
    pub fn new() -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            stage: Stage::Queued,
            status: ItemStatus::Pending,
            error_kind: None,
            started_at: now.clone(),
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, ItemStatus::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ItemStatus::Failed { .. })
    }

    /// Forward move by exactly one stage. Reaching `Done` closes the item.
    pub fn advance(&mut self, to: Stage) -> Result<(), String> {
        if self.is_terminal() {
            return Err(format!("item is terminal ({}), cannot move to {}", self.describe(), to));
        }
        if self.stage.next() != Some(to) {
            return Err(format!("{} does not follow {}", to, self.stage));
        }

        self.record(self.stage, to, None);
        self.stage = to;
        if to == Stage::Done {
            self.status = ItemStatus::Done;
        }
        Ok(())
    }

    pub fn fail(&mut self, attempted: Stage, error_kind: impl Into<String>) {
        self.status = ItemStatus::Failed { stage: attempted };
        self.error_kind = Some(error_kind.into());
        self.touch();
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = ItemStatus::Skipped {
            reason: reason.into(),
        };
        self.touch();
    }

    /// Reopens a failed item at its last committed stage.
    pub fn reopen(&mut self) {
        if self.is_failed() {
            self.status = ItemStatus::Pending;
            self.error_kind = None;
            self.touch();
        }
    }

    /// Moves the item back to `to`. Only invalidation calls this.
    pub fn rewind(&mut self, to: Stage, note: impl Into<String>) {
        if to >= self.stage && !self.is_terminal() {
            return;
        }
        let from = self.stage;
        self.stage = self.stage.min(to);
        self.status = ItemStatus::Pending;
        self.error_kind = None;
        self.record(from, self.stage, Some(note.into()));
    }

    pub fn describe(&self) -> String {
        match &self.status {
            ItemStatus::Pending => format!("pending({})", self.stage),
            ItemStatus::Done => "done".to_string(),
            ItemStatus::Skipped { reason } => format!("skipped({})", reason),
            ItemStatus::Failed { stage } => format!(
                "failed({}, {})",
                stage.step_name(),
                self.error_kind.as_deref().unwrap_or("unknown")
            ),
        }
    }

    fn record(&mut self, from: Stage, to: Stage, note: Option<String>) {
        let now = chrono::Utc::now().to_rfc3339();
        self.history.push(Transition {
            from,
            to,
            at: now.clone(),
            note,
        });
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(Stage::Queued < Stage::Downloaded);
        assert!(Stage::Detected < Stage::Done);
        assert_eq!(Stage::Chunked.next(), Some(Stage::Detected));
        assert_eq!(Stage::Downloaded.previous(), Some(Stage::Queued));
        assert_eq!(Stage::Queued.previous(), None);
    }

    #[test]
    fn test_stage_parsing() {
        assert_eq!("extract".parse::<Stage>().unwrap(), Stage::Extracted);
        assert_eq!("Downloaded".parse::<Stage>().unwrap(), Stage::Downloaded);
        assert!("upload".parse::<Stage>().is_err());
    }

    #[test]
    fn test_forward_only() {
        let mut state = ItemState::new();
        assert!(state.advance(Stage::Extracted).is_err());
        state.advance(Stage::Downloaded).unwrap();
        state.advance(Stage::Extracted).unwrap();
        assert_eq!(state.stage, Stage::Extracted);
        assert_eq!(state.history.len(), 2);
    }

    #[test]
    fn test_done_is_terminal() {
        let mut state = ItemState::new();
        for stage in &Stage::ALL[1..] {
            state.advance(*stage).unwrap();
        }
        assert_eq!(state.status, ItemStatus::Done);
        assert!(state.advance(Stage::Done).is_err());
    }

    #[test]
    fn test_failure_then_reopen() {
        let mut state = ItemState::new();
        state.advance(Stage::Downloaded).unwrap();
        state.fail(Stage::Extracted, "corrupt_file");
        assert_eq!(state.describe(), "failed(extract, corrupt_file)");
        assert!(state.is_terminal());

        state.reopen();
        assert_eq!(state.status, ItemStatus::Pending);
        assert_eq!(state.stage, Stage::Downloaded);
    }

    #[test]
    fn test_rewind_records_history() {
        let mut state = ItemState::new();
        for stage in &Stage::ALL[1..] {
            state.advance(*stage).unwrap();
        }
        state.rewind(Stage::Extracted, "reprocess from chunk");
        assert_eq!(state.stage, Stage::Extracted);
        assert_eq!(state.status, ItemStatus::Pending);
        let last = state.history.last().unwrap();
        assert_eq!(last.from, Stage::Done);
        assert_eq!(last.note.as_deref(), Some("reprocess from chunk"));
    }
}
