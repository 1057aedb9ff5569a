//! History Machine
//!
//! Per-project ordered list of immutable snapshots plus a current pointer.
//! Pushes prune the redo branch and evict beyond the retention cap; undo and
//! redo move the pointer and hand back snapshots for the timeline to
//! reconcile against.
//!
//! The pointer arithmetic is deliberately asymmetric between directions:
//! `undo` returns the entry before the pointer, while `redo` returns the
//! entry at the pre-increment pointer even though the persisted pointer
//! advances past it. Persisted projects depend on this convention;
//! `test_undo_redo_pointer_asymmetry` pins it down. Do not "fix" it without
//! migrating stored pointers.

mod store;

pub use store::{
    HistoryRecord, MemoryProjectStore, ProjectStore, SqliteProjectStore, MAX_PERSISTED_HISTORY,
};

use std::sync::Arc;

use tracing::warn;

use crate::core::project::ProjectSnapshot;
use crate::core::{HistoryId, ProjectId};

/// Retained history entries per project; the oldest beyond this is evicted
pub const MAX_HISTORY_LEN: usize = 50;

/// Snapshot-based undo/redo for one project
pub struct HistoryMachine {
    project_id: ProjectId,
    store: Arc<dyn ProjectStore>,
    entries: Vec<HistoryRecord>,
    /// One past the current entry right after init; at the current entry
    /// right after a push. See the module docs.
    current_index: isize,
    initialized: bool,
    max_len: usize,
}

impl HistoryMachine {
    pub fn new(project_id: &str, store: Arc<dyn ProjectStore>) -> Self {
        Self {
            project_id: project_id.to_string(),
            store,
            entries: vec![],
            current_index: -1,
            initialized: false,
            max_len: MAX_HISTORY_LEN,
        }
    }

    #[cfg(test)]
    fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Loads persisted entries and the pointer. Returns the snapshot the
    /// persisted pointer names, for session recovery. Load failures leave
    /// the machine initialized-empty.
    pub async fn init(&mut self) -> Option<ProjectSnapshot> {
        if self.initialized {
            return self.pointer_snapshot();
        }

        let loaded = async {
            let history = self.store.get_project_history(&self.project_id).await?;
            let state = self.store.get_project_state(&self.project_id).await?;
            Ok::<_, crate::core::CoreError>((history, state))
        }
        .await;

        match loaded {
            Ok((history, state)) => {
                let history_at = state.and_then(|s| s.history_at);
                if !history.is_empty() {
                    self.entries = history;
                    self.current_index = match &history_at {
                        Some(at) => {
                            // A missing id resolves to -1, landing the
                            // pointer at 0.
                            self.entries
                                .iter()
                                .position(|e| &e.id == at)
                                .map(|i| i as isize)
                                .unwrap_or(-1)
                                + 1
                        }
                        None => self.entries.len() as isize,
                    };
                }
                self.initialized = true;
                history_at
                    .and_then(|at| self.entries.iter().find(|e| e.id == at))
                    .map(|e| e.state.clone())
            }
            Err(e) => {
                warn!(project = %self.project_id, error = %e, "failed to initialize history");
                self.initialized = true;
                None
            }
        }
    }

    /// Records a snapshot.
    ///
    /// A push while the pointer is not at the tail discards everything after
    /// it; a fresh edit after undo abandons the redo branch. At the
    /// retention cap the oldest entry is evicted and the pointer adjusted.
    /// Persistence failure is logged and yields `None`; no entry is
    /// appended.
    pub async fn push(&mut self, state: ProjectSnapshot) -> Option<HistoryId> {
        if !self.initialized {
            self.init().await;
        }

        if self.current_index < self.entries.len() as isize - 1 {
            let keep = (self.current_index + 1).max(0) as usize;
            self.entries.truncate(keep);
        }

        if self.entries.len() >= self.max_len {
            self.entries.remove(0);
            self.current_index -= 1;
        }

        match self
            .store
            .push_project_history(&self.project_id, &state)
            .await
        {
            Ok(id) => {
                self.entries.push(HistoryRecord {
                    id: id.clone(),
                    project_id: self.project_id.clone(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    state,
                });
                self.current_index = self.entries.len() as isize - 1;
                Some(id)
            }
            Err(e) => {
                warn!(project = %self.project_id, error = %e, "failed to persist history entry");
                None
            }
        }
    }

    /// Steps the pointer back and returns that entry's snapshot. `None` when
    /// already at the first entry. The persisted pointer failure is logged
    /// and the in-memory move proceeds (optimistic local-first).
    pub async fn undo(&mut self) -> Option<ProjectSnapshot> {
        if !self.initialized {
            self.init().await;
        }
        if self.current_index <= 0 {
            return None;
        }

        if let Err(e) = self
            .store
            .move_project_history_to(&self.project_id, -1)
            .await
        {
            warn!(project = %self.project_id, error = %e, "failed to move persisted history pointer");
        }

        self.current_index -= 1;
        self.entry_at(self.current_index).map(|e| e.state.clone())
    }

    /// Advances the pointer and returns the entry at its pre-increment
    /// position. `None` when already at or past the last entry.
    pub async fn redo(&mut self) -> Option<ProjectSnapshot> {
        if !self.initialized {
            self.init().await;
        }
        if self.current_index >= self.entries.len() as isize {
            return None;
        }

        if let Err(e) = self
            .store
            .move_project_history_to(&self.project_id, 1)
            .await
        {
            warn!(project = %self.project_id, error = %e, "failed to move persisted history pointer");
        }

        let next = self.entry_at(self.current_index).map(|e| e.state.clone());
        self.current_index += 1;
        next
    }

    /// Deletes all entries for the project and resets the pointer.
    pub async fn clear(&mut self) {
        if let Err(e) = self.store.clear_project_history(&self.project_id).await {
            warn!(project = %self.project_id, error = %e, "failed to clear persisted history");
        }
        self.entries.clear();
        self.current_index = -1;
    }

    pub fn can_undo(&self) -> bool {
        self.initialized && self.current_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.initialized && self.current_index < self.entries.len() as isize
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_index(&self) -> isize {
        self.current_index
    }

    /// The entry at the in-memory pointer, when it is in range.
    pub fn current_state(&self) -> Option<ProjectSnapshot> {
        self.entry_at(self.current_index).map(|e| e.state.clone())
    }

    pub fn entry_ids(&self) -> Vec<HistoryId> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }

    fn entry_at(&self, index: isize) -> Option<&HistoryRecord> {
        usize::try_from(index).ok().and_then(|i| self.entries.get(i))
    }

    fn pointer_snapshot(&self) -> Option<ProjectSnapshot> {
        self.current_state()
    }
}

// =============================================================================
// Tests
// =============================================================================
