//! Project Store Collaborator
//!
//! The key-value store holding project state records and history entries.
//! [`MemoryProjectStore`] backs tests (with failure injection);
//! [`SqliteProjectStore`] is the bundled default for real deployments.
//!
//! `move_project_history_to` carries an intentional asymmetry inherited from
//! the persisted format: the index is resolved from the stored `historyAt`
//! (defaulting to the tail, clamped at 0) and `to` is added to it, so `+1`
//! targets the entry after the current one and `-1` the entry before it,
//! never re-resolving against the caller's in-memory pointer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::core::project::{PersistedProjectState, ProjectSnapshot, ProjectStatePatch};
use crate::core::{new_id, CoreError, CoreResult, HistoryId, ProjectId};

/// Persisted entries retained per project; the oldest beyond this are
/// deleted on push
pub const MAX_PERSISTED_HISTORY: usize = 50;

/// A persisted history entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: HistoryId,
    pub project_id: ProjectId,
    /// Milliseconds since the epoch; orders entries within a project
    pub timestamp: i64,
    pub state: ProjectSnapshot,
}

/// The persistent store collaborator contract
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// All history entries for a project, oldest first.
    async fn get_project_history(&self, project_id: &str) -> CoreResult<Vec<HistoryRecord>>;

    /// Persists a snapshot, pruning entries newer than the current pointer,
    /// and moves the pointer to the new entry. Returns its id.
    async fn push_project_history(
        &self,
        project_id: &str,
        state: &ProjectSnapshot,
    ) -> CoreResult<HistoryId>;

    /// Deletes every history entry for the project.
    async fn clear_project_history(&self, project_id: &str) -> CoreResult<()>;

    /// Moves the persisted pointer by ±1 and returns the entry it lands on,
    /// or `None` (pointer unchanged) when out of range.
    async fn move_project_history_to(
        &self,
        project_id: &str,
        to: i32,
    ) -> CoreResult<Option<HistoryRecord>>;

    /// The per-project state record, if any.
    async fn get_project_state(&self, project_id: &str)
        -> CoreResult<Option<PersistedProjectState>>;

    /// Merges a partial update into the project state record.
    async fn update_project_state(
        &self,
        project_id: &str,
        patch: &ProjectStatePatch,
    ) -> CoreResult<()>;
}

/// Next timestamp for a project: wall clock, but strictly increasing.
fn next_timestamp(existing_max: Option<i64>) -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    match existing_max {
        Some(max) => now.max(max + 1),
        None => now,
    }
}

/// Shared pointer-move arithmetic over an ordered history list.
fn resolve_move(
    history: &[HistoryRecord],
    history_at: Option<&str>,
    to: i32,
) -> Option<HistoryRecord> {
    let mut index = history.len() as i64 - 1;
    if let Some(at) = history_at {
        if let Some(found) = history.iter().position(|e| e.id == at) {
            index = found as i64;
        }
    }
    index = index.max(0);

    let next = index + to as i64;
    usize::try_from(next)
        .ok()
        .and_then(|i| history.get(i))
        .cloned()
}

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Default)]
struct MemoryProjectRecord {
    history: Vec<HistoryRecord>,
    state: Option<PersistedProjectState>,
}

/// In-memory store with failure injection, for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: Mutex<HashMap<ProjectId, MemoryProjectRecord>>,
    fail_ops: AtomicBool,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent operations fail until reset, to exercise the
    /// persistence-failure paths.
    pub fn fail_next_ops(&self, fail: bool) {
        self.fail_ops.store(fail, Ordering::SeqCst);
    }

    /// Test helper: drops the persisted pointer for a project.
    pub fn clear_pointer(&self, project_id: &str) {
        let mut projects = self.projects.lock().unwrap();
        if let Some(record) = projects.get_mut(project_id) {
            if let Some(state) = &mut record.state {
                state.history_at = None;
            }
        }
    }

    fn check_failure(&self) -> CoreResult<()> {
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(CoreError::Persistence("store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get_project_history(&self, project_id: &str) -> CoreResult<Vec<HistoryRecord>> {
        self.check_failure()?;
        let projects = self.projects.lock().unwrap();
        Ok(projects
            .get(project_id)
            .map(|r| r.history.clone())
            .unwrap_or_default())
    }

    async fn push_project_history(
        &self,
        project_id: &str,
        state: &ProjectSnapshot,
    ) -> CoreResult<HistoryId> {
        self.check_failure()?;
        let mut projects = self.projects.lock().unwrap();
        let record = projects.entry(project_id.to_string()).or_default();

        // Prune entries newer than the current pointer
        if let Some(at) = record.state.as_ref().and_then(|s| s.history_at.clone()) {
            if let Some(prev) = record.history.iter().find(|e| e.id == at) {
                let cutoff = prev.timestamp;
                record.history.retain(|e| e.timestamp <= cutoff);
            }
        }

        let id = new_id();
        let timestamp = next_timestamp(record.history.iter().map(|e| e.timestamp).max());
        record.history.push(HistoryRecord {
            id: id.clone(),
            project_id: project_id.to_string(),
            timestamp,
            state: state.clone(),
        });
        record
            .state
            .get_or_insert_with(Default::default)
            .history_at = Some(id.clone());

        // Retention cap, oldest first
        let excess = record.history.len().saturating_sub(MAX_PERSISTED_HISTORY);
        if excess > 0 {
            record.history.drain(0..excess);
        }
        Ok(id)
    }

    async fn clear_project_history(&self, project_id: &str) -> CoreResult<()> {
        self.check_failure()?;
        let mut projects = self.projects.lock().unwrap();
        if let Some(record) = projects.get_mut(project_id) {
            record.history.clear();
        }
        Ok(())
    }

    async fn move_project_history_to(
        &self,
        project_id: &str,
        to: i32,
    ) -> CoreResult<Option<HistoryRecord>> {
        self.check_failure()?;
        let mut projects = self.projects.lock().unwrap();
        let record = projects.entry(project_id.to_string()).or_default();

        let history_at = record.state.as_ref().and_then(|s| s.history_at.clone());
        let next = resolve_move(&record.history, history_at.as_deref(), to);
        if let Some(next) = &next {
            record
                .state
                .get_or_insert_with(Default::default)
                .history_at = Some(next.id.clone());
        }
        Ok(next)
    }

    async fn get_project_state(
        &self,
        project_id: &str,
    ) -> CoreResult<Option<PersistedProjectState>> {
        self.check_failure()?;
        let projects = self.projects.lock().unwrap();
        Ok(projects.get(project_id).and_then(|r| r.state.clone()))
    }

    async fn update_project_state(
        &self,
        project_id: &str,
        patch: &ProjectStatePatch,
    ) -> CoreResult<()> {
        self.check_failure()?;
        let mut projects = self.projects.lock().unwrap();
        let record = projects.entry(project_id.to_string()).or_default();
        record
            .state
            .get_or_insert_with(Default::default)
            .apply(patch);
        Ok(())
    }
}

// =============================================================================
// SQLite Store
// =============================================================================

/// SQLite-backed project store (bundled engine)
pub struct SqliteProjectStore {
    conn: Mutex<Connection>,
}

impl SqliteProjectStore {
    /// Opens (or creates) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::Persistence(format!("failed to open project store: {}", e)))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Creates an in-memory store (for testing).
    pub fn in_memory() -> CoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            CoreError::Persistence(format!("failed to create in-memory store: {}", e))
        })?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                state TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_project ON history(project_id, timestamp);

            CREATE TABLE IF NOT EXISTS project_state (
                project_id TEXT PRIMARY KEY,
                history_at TEXT,
                aspect_ratio TEXT
            );
            "#,
        )
        .map_err(|e| CoreError::Persistence(format!("failed to initialize schema: {}", e)))?;
        Ok(())
    }

    fn load_history(conn: &Connection, project_id: &str) -> CoreResult<Vec<HistoryRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, project_id, timestamp, state FROM history
                 WHERE project_id = ?1 ORDER BY timestamp ASC",
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(sql_err)?;

        let mut history = vec![];
        for row in rows {
            let (id, project_id, timestamp, state_json) = row.map_err(sql_err)?;
            let state: ProjectSnapshot = serde_json::from_str(&state_json)?;
            history.push(HistoryRecord {
                id,
                project_id,
                timestamp,
                state,
            });
        }
        Ok(history)
    }

    fn load_state(conn: &Connection, project_id: &str) -> CoreResult<Option<PersistedProjectState>> {
        conn.query_row(
            "SELECT history_at, aspect_ratio FROM project_state WHERE project_id = ?1",
            params![project_id],
            |row| {
                Ok(PersistedProjectState {
                    history_at: row.get(0)?,
                    aspect_ratio: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(sql_err)
    }

    fn store_pointer(conn: &Connection, project_id: &str, history_at: &str) -> CoreResult<()> {
        conn.execute(
            "INSERT INTO project_state (project_id, history_at) VALUES (?1, ?2)
             ON CONFLICT(project_id) DO UPDATE SET history_at = excluded.history_at",
            params![project_id, history_at],
        )
        .map_err(sql_err)?;
        Ok(())
    }
}

fn sql_err(e: rusqlite::Error) -> CoreError {
    CoreError::Persistence(e.to_string())
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn get_project_history(&self, project_id: &str) -> CoreResult<Vec<HistoryRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::load_history(&conn, project_id)
    }

    async fn push_project_history(
        &self,
        project_id: &str,
        state: &ProjectSnapshot,
    ) -> CoreResult<HistoryId> {
        let conn = self.conn.lock().unwrap();

        // Prune entries newer than the current pointer
        let pointer = Self::load_state(&conn, project_id)?.and_then(|s| s.history_at);
        if let Some(at) = pointer {
            let cutoff: Option<i64> = conn
                .query_row(
                    "SELECT timestamp FROM history WHERE id = ?1 AND project_id = ?2",
                    params![at, project_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)?;
            if let Some(cutoff) = cutoff {
                conn.execute(
                    "DELETE FROM history WHERE project_id = ?1 AND timestamp > ?2",
                    params![project_id, cutoff],
                )
                .map_err(sql_err)?;
            }
        }

        let max_ts: Option<i64> = conn
            .query_row(
                "SELECT MAX(timestamp) FROM history WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .map_err(sql_err)?;

        let id = new_id();
        let timestamp = next_timestamp(max_ts);
        let state_json = serde_json::to_string(state)?;
        conn.execute(
            "INSERT INTO history (id, project_id, timestamp, state) VALUES (?1, ?2, ?3, ?4)",
            params![id, project_id, timestamp, state_json],
        )
        .map_err(sql_err)?;

        Self::store_pointer(&conn, project_id, &id)?;

        // Retention cap: keep only the newest entries
        conn.execute(
            "DELETE FROM history WHERE project_id = ?1 AND timestamp < (
                 SELECT timestamp FROM history WHERE project_id = ?1
                 ORDER BY timestamp DESC LIMIT 1 OFFSET ?2
             )",
            params![project_id, (MAX_PERSISTED_HISTORY - 1) as i64],
        )
        .map_err(sql_err)?;
        Ok(id)
    }

    async fn clear_project_history(&self, project_id: &str) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM history WHERE project_id = ?1",
            params![project_id],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn move_project_history_to(
        &self,
        project_id: &str,
        to: i32,
    ) -> CoreResult<Option<HistoryRecord>> {
        let conn = self.conn.lock().unwrap();
        let history = Self::load_history(&conn, project_id)?;
        let history_at = Self::load_state(&conn, project_id)?.and_then(|s| s.history_at);

        let next = resolve_move(&history, history_at.as_deref(), to);
        if let Some(next) = &next {
            Self::store_pointer(&conn, project_id, &next.id)?;
        }
        Ok(next)
    }

    async fn get_project_state(
        &self,
        project_id: &str,
    ) -> CoreResult<Option<PersistedProjectState>> {
        let conn = self.conn.lock().unwrap();
        Self::load_state(&conn, project_id)
    }

    async fn update_project_state(
        &self,
        project_id: &str,
        patch: &ProjectStatePatch,
    ) -> CoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let mut state = Self::load_state(&conn, project_id)?.unwrap_or_default();
        state.apply(patch);
        conn.execute(
            "INSERT INTO project_state (project_id, history_at, aspect_ratio) VALUES (?1, ?2, ?3)
             ON CONFLICT(project_id) DO UPDATE SET
                 history_at = excluded.history_at,
                 aspect_ratio = excluded.aspect_ratio",
            params![project_id, state.history_at, state.aspect_ratio],
        )
        .map_err(sql_err)?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timeline::Rail;
    use crate::core::MediaKind;
    use tempfile::TempDir;

    fn snapshot(tag: usize) -> ProjectSnapshot {
        ProjectSnapshot {
            rails: (0..tag).map(|_| Rail::new(MediaKind::Video)).collect(),
            sources: Default::default(),
        }
    }

    async fn exercise_store(store: &dyn ProjectStore) {
        // Push three entries
        let a = store.push_project_history("p", &snapshot(1)).await.unwrap();
        let b = store.push_project_history("p", &snapshot(2)).await.unwrap();
        let c = store.push_project_history("p", &snapshot(3)).await.unwrap();

        let history = store.get_project_history("p").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, a);
        assert!(history[0].timestamp < history[2].timestamp);

        // Pointer follows the latest push
        let state = store.get_project_state("p").await.unwrap().unwrap();
        assert_eq!(state.history_at.as_deref(), Some(c.as_str()));

        // -1 targets the entry before the pointer
        let moved = store.move_project_history_to("p", -1).await.unwrap().unwrap();
        assert_eq!(moved.id, b);
        // +1 targets the entry after it
        let moved = store.move_project_history_to("p", 1).await.unwrap().unwrap();
        assert_eq!(moved.id, c);
        // Past the end: None, pointer unchanged
        assert!(store.move_project_history_to("p", 1).await.unwrap().is_none());
        let state = store.get_project_state("p").await.unwrap().unwrap();
        assert_eq!(state.history_at.as_deref(), Some(c.as_str()));

        // A push from a rewound pointer prunes the newer entries
        store.move_project_history_to("p", -1).await.unwrap();
        store.move_project_history_to("p", -1).await.unwrap();
        let d = store.push_project_history("p", &snapshot(4)).await.unwrap();
        let history = store.get_project_history("p").await.unwrap();
        assert_eq!(
            history.iter().map(|e| e.id.clone()).collect::<Vec<_>>(),
            vec![a.clone(), d]
        );

        // Aspect ratio patch keeps the pointer
        store
            .update_project_state(
                "p",
                &ProjectStatePatch {
                    aspect_ratio: Some("9:16".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let state = store.get_project_state("p").await.unwrap().unwrap();
        assert_eq!(state.aspect_ratio.as_deref(), Some("9:16"));
        assert!(state.history_at.is_some());

        // Clear removes the history but not the state record
        store.clear_project_history("p").await.unwrap();
        assert!(store.get_project_history("p").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemoryProjectStore::new();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        let store = SqliteProjectStore::in_memory().unwrap();
        exercise_store(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");

        let id = {
            let store = SqliteProjectStore::open(&path).unwrap();
            store.push_project_history("p", &snapshot(2)).await.unwrap()
        };

        let store = SqliteProjectStore::open(&path).unwrap();
        let history = store.get_project_history("p").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].state.rails.len(), 2);
        let state = store.get_project_state("p").await.unwrap().unwrap();
        assert_eq!(state.history_at.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_move_with_empty_history() {
        let store = MemoryProjectStore::new();
        assert!(store.move_project_history_to("p", -1).await.unwrap().is_none());
        assert!(store.move_project_history_to("p", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_move_without_pointer_defaults_to_tail() {
        let store = MemoryProjectStore::new();
        store.push_project_history("p", &snapshot(1)).await.unwrap();
        let b = store.push_project_history("p", &snapshot(2)).await.unwrap();
        store.clear_pointer("p");

        // Tail is index len-1; +1 walks past the end
        assert!(store.move_project_history_to("p", 1).await.unwrap().is_none());
        // -1 from the tail lands on the first entry
        let moved = store.move_project_history_to("p", -1).await.unwrap().unwrap();
        assert_ne!(moved.id, b);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryProjectStore::new();
        store.fail_next_ops(true);
        assert!(store.push_project_history("p", &snapshot(1)).await.is_err());
        assert!(store.get_project_history("p").await.is_err());
        store.fail_next_ops(false);
        assert!(store.push_project_history("p", &snapshot(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_persisted_history_respects_cap() {
        for store in [
            Box::new(MemoryProjectStore::new()) as Box<dyn ProjectStore>,
            Box::new(SqliteProjectStore::in_memory().unwrap()),
        ] {
            for i in 0..55 {
                store.push_project_history("p", &snapshot(i + 1)).await.unwrap();
            }
            let history = store.get_project_history("p").await.unwrap();
            assert_eq!(history.len(), MAX_PERSISTED_HISTORY);
            // Newest entries survive
            assert_eq!(history.last().unwrap().state.rails.len(), 55);
            assert_eq!(history[0].state.rails.len(), 6);
        }
    }

    #[tokio::test]
    async fn test_projects_do_not_share_history() {
        let store = MemoryProjectStore::new();
        store.push_project_history("a", &snapshot(1)).await.unwrap();
        assert!(store.get_project_history("b").await.unwrap().is_empty());
    }
}
