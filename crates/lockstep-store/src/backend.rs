//! Pluggable persistence backends for state stores.
//!
//! The [`StateStore`] participant owns the buffering and flush protocol;
//! a [`StoreBackend`] only durably commits a resolved batch. The
//! persistence medium itself is out of the protocol's scope -- anything
//! that can commit a batch idempotently with respect to empty batches
//! works.
//!
//! [`StateStore`]: crate::store::StateStore

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lockstep_types::StateUpdate;

use crate::error::StoreError;

/// The commit interface behind a buffering store.
pub trait StoreBackend: Send {
    /// Durably commit a batch of updates.
    ///
    /// Called once per flush with the conflict-resolved batch; an empty
    /// batch must be a no-op so that flushing twice without intervening
    /// updates leaves the persisted state unchanged.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the batch cannot be committed; the
    /// store treats this as fatal.
    fn commit(&mut self, batch: &[StateUpdate]) -> Result<(), StoreError>;
}

/// Shared read handle onto a [`MemoryBackend`]'s committed state.
///
/// The backend itself moves into the store task; tests and summaries keep
/// a view to inspect what was committed.
#[derive(Debug, Clone, Default)]
pub struct MemoryView {
    committed: Arc<Mutex<BTreeMap<String, StateUpdate>>>,
}

impl MemoryView {
    /// Snapshot the committed state, keyed by update key.
    pub fn snapshot(&self) -> BTreeMap<String, StateUpdate> {
        self.committed.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.committed.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// True if nothing has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory backend: committed state is a key-value map.
///
/// Later commits to a key overwrite earlier ones, so the committed map
/// always reflects the latest flushed value per key.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    committed: Arc<Mutex<BTreeMap<String, StateUpdate>>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared view onto this backend's committed state.
    pub fn view(&self) -> MemoryView {
        MemoryView {
            committed: Arc::clone(&self.committed),
        }
    }
}

impl StoreBackend for MemoryBackend {
    fn commit(&mut self, batch: &[StateUpdate]) -> Result<(), StoreError> {
        let mut committed = self.committed.lock().map_err(|e| StoreError::Backend {
            message: format!("memory backend lock poisoned: {e}"),
        })?;
        for update in batch {
            committed.insert(update.key.clone(), update.clone());
        }
        Ok(())
    }
}

/// Append-only JSON-lines file backend.
///
/// Each committed update becomes one JSON line. The file is opened per
/// commit so a store that never flushes never touches the filesystem.
#[derive(Debug)]
pub struct JsonlBackend {
    path: PathBuf,
}

impl JsonlBackend {
    /// Create a backend writing to the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreBackend for JsonlBackend {
    fn commit(&mut self, batch: &[StateUpdate]) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for update in batch {
            let line = serde_json::to_string(update)?;
            writeln!(file, "{line}")?;
        }
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lockstep_types::{AgentId, StoreId};

    use super::*;

    fn update(key: &str, value: i64) -> StateUpdate {
        StateUpdate {
            store: StoreId::new("test"),
            key: key.to_owned(),
            value: serde_json::json!(value),
            agent_id: AgentId::new(),
            step: 0,
        }
    }

    #[test]
    fn memory_backend_overwrites_per_key() {
        let mut backend = MemoryBackend::new();
        let view = backend.view();

        backend.commit(&[update("a", 1), update("b", 2)]).unwrap();
        backend.commit(&[update("a", 3)]).unwrap();

        let snapshot = view.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("a").unwrap().value, serde_json::json!(3));
    }

    #[test]
    fn empty_commit_is_a_no_op() {
        let mut backend = MemoryBackend::new();
        let view = backend.view();
        backend.commit(&[update("a", 1)]).unwrap();
        backend.commit(&[]).unwrap();
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn jsonl_backend_appends_one_line_per_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.jsonl");
        let mut backend = JsonlBackend::new(&path);

        backend.commit(&[update("a", 1), update("b", 2)]).unwrap();
        backend.commit(&[update("c", 3)]).unwrap();
        // Empty commit must not create noise lines.
        backend.commit(&[]).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: StateUpdate = serde_json::from_str(lines.first().unwrap()).unwrap();
        assert_eq!(first.key, "a");
    }
}
