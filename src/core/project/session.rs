//! Project Session
//!
//! Wires one project's timeline and history machine together behind a fair
//! (FIFO) lock: edits, commits, undo and redo are serialized per project, so
//! an in-flight commit, including its persistence, completes before a
//! subsequent undo is honored.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::core::history::{HistoryMachine, ProjectStore};
use crate::core::project::ProjectStatePatch;
use crate::core::render::RenderEngine;
use crate::core::timeline::{Registries, Timeline};
use crate::core::{CoreResult, HistoryId, ProjectId, Size2D};

/// The lock-guarded state of a session
pub struct SessionState {
    pub timeline: Timeline,
    history: HistoryMachine,
}

/// One project's editing session
pub struct ProjectSession {
    project_id: ProjectId,
    store: Arc<dyn ProjectStore>,
    state: Mutex<SessionState>,
}

impl ProjectSession {
    pub fn new(
        project_id: &str,
        canvas: Size2D,
        engine: Arc<dyn RenderEngine>,
        registries: Registries,
        store: Arc<dyn ProjectStore>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            store: store.clone(),
            state: Mutex::new(SessionState {
                timeline: Timeline::new(project_id, canvas, engine, registries),
                history: HistoryMachine::new(project_id, store),
            }),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Exclusive access to the timeline for editing. The returned guard is
    /// the same fair lock `commit`/`undo`/`redo` take, so edits order FIFO
    /// with history operations.
    pub async fn edit(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Loads persisted history and, when the store names a current entry,
    /// reconciles the timeline to it. Restores the persisted aspect ratio.
    /// Returns whether a state was recovered.
    pub async fn recover(&self) -> CoreResult<bool> {
        let mut state = self.state.lock().await;

        let aspect_ratio = match self.store.get_project_state(&self.project_id).await {
            Ok(persisted) => persisted.and_then(|p| p.aspect_ratio),
            Err(e) => {
                warn!(project = %self.project_id, error = %e, "failed to load project state");
                None
            }
        };
        if let Some(label) = aspect_ratio {
            if let Err(e) = state.timeline.set_aspect_ratio(&label) {
                warn!(project = %self.project_id, error = %e, "ignoring unknown aspect ratio");
            }
        }

        let Some(snapshot) = state.history.init().await else {
            return Ok(false);
        };
        state.timeline.reconcile(&snapshot).await?;
        Ok(true)
    }

    /// Captures the timeline and records it as a new history entry.
    /// Persistence failure leaves the in-memory edit intact and returns
    /// `None`; the edit may be lost on reload, not now.
    pub async fn commit(&self) -> Option<HistoryId> {
        let mut state = self.state.lock().await;
        let snapshot = state.timeline.snapshot();
        state.history.push(snapshot).await
    }

    /// Steps the history back and reconciles the timeline to the returned
    /// snapshot. Returns whether anything changed.
    pub async fn undo(&self) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(snapshot) = state.history.undo().await else {
            return Ok(false);
        };
        state.timeline.reconcile(&snapshot).await?;
        Ok(true)
    }

    /// Steps the history forward and reconciles the timeline to the returned
    /// snapshot. Returns whether anything changed.
    pub async fn redo(&self) -> CoreResult<bool> {
        let mut state = self.state.lock().await;
        let Some(snapshot) = state.history.redo().await else {
            return Ok(false);
        };
        state.timeline.reconcile(&snapshot).await?;
        Ok(true)
    }

    /// Deletes the project's history entries and resets the pointer.
    pub async fn clear_history(&self) {
        let mut state = self.state.lock().await;
        state.history.clear().await;
    }

    pub async fn can_undo(&self) -> bool {
        self.state.lock().await.history.can_undo()
    }

    pub async fn can_redo(&self) -> bool {
        self.state.lock().await.history.can_redo()
    }

    pub async fn history_len(&self) -> usize {
        self.state.lock().await.history.len()
    }

    /// Switches the canvas preset and persists the choice.
    pub async fn set_aspect_ratio(&self, label: &str) -> CoreResult<Size2D> {
        let mut state = self.state.lock().await;
        let size = state.timeline.set_aspect_ratio(label)?;
        if let Err(e) = self
            .store
            .update_project_state(
                &self.project_id,
                &ProjectStatePatch {
                    aspect_ratio: Some(label.to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            warn!(project = %self.project_id, error = %e, "failed to persist aspect ratio");
        }
        Ok(size)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::history::MemoryProjectStore;
    use crate::core::render::{ClipOrigin, MemoryRenderEngine};
    use crate::core::timeline::PlaceOptions;
    use crate::core::{MediaKind, US_PER_SEC};

    fn session_with(engine: Arc<MemoryRenderEngine>, store: Arc<MemoryProjectStore>) -> ProjectSession {
        engine.register_media("vid-a", 10 * US_PER_SEC, 1280, 720);
        engine.register_media("vid-b", 10 * US_PER_SEC, 1280, 720);
        ProjectSession::new(
            "proj",
            Size2D::new(1920, 1080),
            engine,
            Registries::default(),
            store,
        )
    }

    fn session() -> (ProjectSession, Arc<MemoryRenderEngine>, Arc<MemoryProjectStore>) {
        let engine = Arc::new(MemoryRenderEngine::new());
        let store = Arc::new(MemoryProjectStore::new());
        (session_with(engine.clone(), store.clone()), engine, store)
    }

    fn file(id: &str) -> ClipOrigin {
        ClipOrigin::File {
            file_id: id.to_string(),
        }
    }

    fn at(start: i64) -> PlaceOptions {
        PlaceOptions {
            start: Some(start),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_commit_undo_roundtrip() {
        let (session, _, _) = session();

        {
            let mut state = session.edit().await;
            state
                .timeline
                .place(MediaKind::Video, file("vid-a"), at(0))
                .await
                .unwrap();
        }
        session.commit().await.unwrap();

        {
            let mut state = session.edit().await;
            state
                .timeline
                .place(MediaKind::Video, file("vid-b"), at(10 * US_PER_SEC))
                .await
                .unwrap();
        }
        session.commit().await.unwrap();

        assert!(session.undo().await.unwrap());
        let state = session.edit().await;
        assert_eq!(state.timeline.source_count(), 1);
    }

    #[tokio::test]
    async fn test_undo_with_no_history_is_noop() {
        let (session, _, _) = session();
        assert!(!session.undo().await.unwrap());
        assert!(!session.redo().await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_after_undo_discards_redo() {
        let (session, _, _) = session();

        for start in [0i64, 10, 20] {
            let mut state = session.edit().await;
            state
                .timeline
                .place(MediaKind::Video, file("vid-a"), at(start * US_PER_SEC))
                .await
                .unwrap();
            drop(state);
            session.commit().await.unwrap();
        }
        assert_eq!(session.history_len().await, 3);

        session.undo().await.unwrap();
        session.commit().await.unwrap();

        // The abandoned redo branch is gone
        assert_eq!(session.history_len().await, 3);
        assert!(session.can_undo().await);
    }

    #[tokio::test]
    async fn test_recover_restores_persisted_state() {
        let engine = Arc::new(MemoryRenderEngine::new());
        let store = Arc::new(MemoryProjectStore::new());

        {
            let session = session_with(engine.clone(), store.clone());
            let mut state = session.edit().await;
            state
                .timeline
                .place(MediaKind::Video, file("vid-a"), at(0))
                .await
                .unwrap();
            drop(state);
            session.commit().await.unwrap();
            session.set_aspect_ratio("9:16").await.unwrap();
            // Session dropped; live handles remain with the engine, but a
            // fresh session starts empty.
        }

        let fresh_engine = Arc::new(MemoryRenderEngine::new());
        let session = session_with(fresh_engine.clone(), store);
        assert!(session.recover().await.unwrap());

        let state = session.edit().await;
        assert_eq!(state.timeline.source_count(), 1);
        assert_eq!(state.timeline.canvas(), Size2D::new(1080, 1920));
        assert_eq!(fresh_engine.clip_count(), 1);
    }

    #[tokio::test]
    async fn test_recover_without_history_reports_nothing() {
        let (session, _, _) = session();
        assert!(!session.recover().await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_commits_are_serialized() {
        let (session, _, _) = session();
        {
            let mut state = session.edit().await;
            state
                .timeline
                .place(MediaKind::Video, file("vid-a"), at(0))
                .await
                .unwrap();
        }

        let session = Arc::new(session);
        let a = {
            let session = session.clone();
            tokio::spawn(async move { session.commit().await })
        };
        let b = {
            let session = session.clone();
            tokio::spawn(async move { session.commit().await })
        };
        assert!(a.await.unwrap().is_some());
        assert!(b.await.unwrap().is_some());
        assert_eq!(session.history_len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_persistence_keeps_in_memory_edit() {
        let (session, _, store) = session();
        {
            let mut state = session.edit().await;
            state
                .timeline
                .place(MediaKind::Video, file("vid-a"), at(0))
                .await
                .unwrap();
        }

        store.fail_next_ops(true);
        assert!(session.commit().await.is_none());

        // The edit itself survives in memory
        let state = session.edit().await;
        assert_eq!(state.timeline.source_count(), 1);
    }

    #[tokio::test]
    async fn test_set_aspect_ratio_persists() {
        let (session, _, store) = session();
        let size = session.set_aspect_ratio("1:1").await.unwrap();
        assert_eq!(size, Size2D::new(1080, 1080));

        let persisted = store.get_project_state("proj").await.unwrap().unwrap();
        assert_eq!(persisted.aspect_ratio.as_deref(), Some("1:1"));
    }

    #[tokio::test]
    async fn test_unknown_aspect_ratio_rejected() {
        let (session, _, _) = session();
        assert!(session.set_aspect_ratio("2:1").await.is_err());
    }
}
