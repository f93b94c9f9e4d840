//! Task snapshot persistence.
//!
//! The scheduler saves a snapshot after every lifecycle transition and
//! step outcome; the status boundary and the retention sweeper read from
//! here. The scheduling hot path never does.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use crate::context::ExecutionContext;
use crate::db::Database;
use crate::error::OrchestratorError;
use crate::machine::TaskState;
use crate::model::{TaskPriority, TaskSnapshot};

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, snapshot: &TaskSnapshot) -> Result<(), OrchestratorError> {
        let s = snapshot.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, workflow_name, state, priority, step_records, context, result, error, degraded, created_at, completed_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     ON CONFLICT(id) DO UPDATE SET
                       state = excluded.state,
                       step_records = excluded.step_records,
                       context = excluded.context,
                       result = excluded.result,
                       error = excluded.error,
                       degraded = excluded.degraded,
                       completed_at = excluded.completed_at,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        s.id,
                        s.workflow_name,
                        s.state.as_str(),
                        s.priority.as_str(),
                        serde_json::to_string(&s.steps).unwrap_or_default(),
                        serde_json::to_string(&s.context).unwrap_or_default(),
                        s.result
                            .as_ref()
                            .map(|r| serde_json::to_string(r).unwrap_or_default()),
                        s.error
                            .as_ref()
                            .map(|e| serde_json::to_string(e).unwrap_or_default()),
                        s.degraded as i64,
                        s.created_at.timestamp_millis(),
                        s.completed_at.map(|t| t.timestamp_millis()),
                        Utc::now().timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<TaskSnapshot>, OrchestratorError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_name, state, priority, step_records, context, result, error, degraded, created_at, completed_at
                     FROM tasks WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_snapshot(row)))
                    .optional()
            })
            .await
    }

    pub async fn list(&self) -> Result<Vec<TaskSnapshot>, OrchestratorError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_name, state, priority, step_records, context, result, error, degraded, created_at, completed_at
                     FROM tasks ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok(row_to_snapshot(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Count tasks grouped by state.
    pub async fn count_by_state(&self) -> Result<HashMap<String, i64>, OrchestratorError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT state, COUNT(*) FROM tasks GROUP BY state")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })?
                    .collect::<Result<HashMap<_, _>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Remove terminal tasks that completed before the cutoff. Returns the
    /// number of rows deleted. Running tasks are never touched.
    pub async fn delete_completed_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, OrchestratorError> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM tasks
                     WHERE state IN ('completed', 'failed', 'cancelled')
                       AND completed_at IS NOT NULL
                       AND completed_at < ?1",
                    rusqlite::params![cutoff_ms],
                )?;
                Ok(deleted)
            })
            .await
    }
}

fn row_to_snapshot(row: &Row<'_>) -> TaskSnapshot {
    let steps_json: String = row.get(4).unwrap_or_default();
    let context_json: String = row.get(5).unwrap_or_default();
    let result_json: Option<String> = row.get(6).unwrap_or(None);
    let error_json: Option<String> = row.get(7).unwrap_or(None);
    let created_ms: i64 = row.get(9).unwrap_or(0);
    let completed_ms: Option<i64> = row.get(10).unwrap_or(None);

    TaskSnapshot {
        id: row.get(0).unwrap_or_default(),
        workflow_name: row.get(1).unwrap_or_default(),
        state: TaskState::from_str(&row.get::<_, String>(2).unwrap_or_default())
            .unwrap_or(TaskState::Idle),
        priority: TaskPriority::from_str(&row.get::<_, String>(3).unwrap_or_default())
            .unwrap_or_default(),
        steps: serde_json::from_str(&steps_json).unwrap_or_default(),
        context: serde_json::from_str::<ExecutionContext>(&context_json).unwrap_or_default(),
        result: result_json.and_then(|j| serde_json::from_str(&j).ok()),
        error: error_json.and_then(|j| serde_json::from_str(&j).ok()),
        degraded: row.get::<_, i64>(8).unwrap_or(0) != 0,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
        completed_at: completed_ms.and_then(DateTime::from_timestamp_millis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Duration;

    use crate::model::{StepRecord, StepStatus};

    fn snapshot(id: &str, state: TaskState) -> TaskSnapshot {
        let mut steps = BTreeMap::new();
        let mut record = StepRecord::pending();
        record.status = StepStatus::Succeeded;
        record.attempts = 1;
        steps.insert("respond".to_string(), record);

        TaskSnapshot {
            id: id.to_string(),
            workflow_name: "default".to_string(),
            state,
            priority: TaskPriority::Normal,
            steps,
            context: ExecutionContext::new(),
            result: None,
            error: None,
            degraded: false,
            created_at: Utc::now(),
            completed_at: state.is_terminal().then(Utc::now),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let store = TaskStore::new(Database::open_in_memory().unwrap());
        store.save(&snapshot("t-1", TaskState::Running)).await.unwrap();

        let loaded = store.get("t-1").await.unwrap().expect("task expected");
        assert_eq!(loaded.workflow_name, "default");
        assert_eq!(loaded.state, TaskState::Running);
        assert_eq!(loaded.steps["respond"].status, StepStatus::Succeeded);
        assert_eq!(loaded.steps["respond"].attempts, 1);

        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let store = TaskStore::new(Database::open_in_memory().unwrap());
        store.save(&snapshot("t-1", TaskState::Running)).await.unwrap();
        store.save(&snapshot("t-1", TaskState::Completed)).await.unwrap();

        let loaded = store.get("t-1").await.unwrap().unwrap();
        assert_eq!(loaded.state, TaskState::Completed);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retention_deletes_only_old_terminal_tasks() {
        let store = TaskStore::new(Database::open_in_memory().unwrap());

        let mut old_done = snapshot("old-done", TaskState::Completed);
        old_done.completed_at = Some(Utc::now() - Duration::hours(48));
        store.save(&old_done).await.unwrap();

        let mut fresh_done = snapshot("fresh-done", TaskState::Completed);
        fresh_done.completed_at = Some(Utc::now());
        store.save(&fresh_done).await.unwrap();

        store.save(&snapshot("live", TaskState::Running)).await.unwrap();

        let deleted = store
            .delete_completed_before(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("old-done").await.unwrap().is_none());
        assert!(store.get("fresh-done").await.unwrap().is_some());
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_count_by_state() {
        let store = TaskStore::new(Database::open_in_memory().unwrap());
        store.save(&snapshot("a", TaskState::Running)).await.unwrap();
        store.save(&snapshot("b", TaskState::Running)).await.unwrap();
        store.save(&snapshot("c", TaskState::Failed)).await.unwrap();

        let counts = store.count_by_state().await.unwrap();
        assert_eq!(counts.get("running"), Some(&2));
        assert_eq!(counts.get("failed"), Some(&1));
    }
}
