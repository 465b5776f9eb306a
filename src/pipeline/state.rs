// file: src/pipeline/state.rs
// description: shared per-item state map flushed to state.json after every change
// reference: json persistence with tokio::fs

use crate::error::{PipelineError, Result};
use crate::models::ItemState;
use crate::pipeline::artifacts::{read_json, write_json_atomic};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub type StateMap = BTreeMap<String, ItemState>;

pub struct StateStore {
    path: PathBuf,
    items: Mutex<StateMap>,
}

impl StateStore {
    /// Loads `state.json` when present. An unreadable snapshot starts a fresh map.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items: StateMap = read_json(&path).await.unwrap_or_default();
        if !items.is_empty() {
            info!("Loaded state for {} item(s) from {}", items.len(), path.display());
        }
        Self {
            path,
            items: Mutex::new(items),
        }
    }

    pub async fn get(&self, link_id: &str) -> Option<ItemState> {
        self.items.lock().await.get(link_id).cloned()
    }

    pub async fn snapshot(&self) -> StateMap {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Returns the state of `link_id`, registering a queued entry first if needed.
    pub async fn ensure(&self, link_id: &str) -> Result<ItemState> {
        let mut items = self.items.lock().await;
        if let Some(state) = items.get(link_id) {
            return Ok(state.clone());
        }
        let state = ItemState::new();
        items.insert(link_id.to_string(), state.clone());
        self.flush(&items).await?;
        Ok(state)
    }

    /// Applies `change` and persists the snapshot inside one critical section.
    pub async fn update<F>(&self, link_id: &str, change: F) -> Result<ItemState>
    where
        F: FnOnce(&mut ItemState) -> std::result::Result<(), String>,
    {
        let mut items = self.items.lock().await;
        let state = items.entry(link_id.to_string()).or_default();
        change(state).map_err(|message| PipelineError::StateTransition {
            link_id: link_id.to_string(),
            message,
        })?;
        let updated = state.clone();
        self.flush(&items).await?;
        debug!("{} -> {}", link_id, updated.describe());
        Ok(updated)
    }

    /// Applies `change` to every entry and flushes once.
    pub async fn update_all<F>(&self, mut change: F) -> Result<()>
    where
        F: FnMut(&str, &mut ItemState),
    {
        let mut items = self.items.lock().await;
        for (link_id, state) in items.iter_mut() {
            change(link_id, state);
        }
        self.flush(&items).await
    }

    async fn flush(&self, items: &StateMap) -> Result<()> {
        write_json_atomic(&self.path, items).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemStatus, Stage};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_updates_are_persisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::load(&path).await;
        assert!(store.is_empty().await);

        store.ensure("abc").await.unwrap();
        store
            .update("abc", |state| state.advance(Stage::Downloaded))
            .await
            .unwrap();

        let reloaded = StateStore::load(&path).await;
        let state = reloaded.get("abc").await.unwrap();
        assert_eq!(state.stage, Stage::Downloaded);
        assert_eq!(state.status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let dir = tempdir().unwrap();
        let store = StateStore::load(dir.path().join("state.json")).await;
        let err = store
            .update("abc", |state| state.advance(Stage::Chunked))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StateTransition { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_updates() {
        let dir = tempdir().unwrap();
        let store = Arc::new(StateStore::load(dir.path().join("state.json")).await);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let id = format!("item{}", i);
                    store.ensure(&id).await.unwrap();
                    store
                        .update(&id, |state| state.advance(Stage::Downloaded))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let reloaded = StateStore::load(dir.path().join("state.json")).await;
        assert_eq!(reloaded.len().await, 8);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();
        let store = StateStore::load(&path).await;
        assert!(store.is_empty().await);
    }
}
