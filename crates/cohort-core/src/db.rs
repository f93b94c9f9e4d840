//! SQLite persistence layer for task snapshots.
//!
//! Uses rusqlite with WAL mode for concurrent read performance. All
//! database operations run through `tokio::task::spawn_blocking` so the
//! async scheduler never blocks on disk I/O.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::OrchestratorError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, OrchestratorError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| OrchestratorError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| OrchestratorError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, OrchestratorError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| OrchestratorError::Database(format!("Failed to open in-memory db: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| OrchestratorError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| OrchestratorError::Database(e.to_string()))
    }

    /// Execute a closure with access to the database connection without
    /// blocking the async runtime.
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| OrchestratorError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), OrchestratorError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    id              TEXT PRIMARY KEY,
                    workflow_name   TEXT NOT NULL,
                    state           TEXT NOT NULL,
                    priority        TEXT NOT NULL DEFAULT 'normal',
                    step_records    TEXT NOT NULL DEFAULT '{}',
                    context         TEXT NOT NULL DEFAULT '{}',
                    result          TEXT,
                    error           TEXT,
                    degraded        INTEGER NOT NULL DEFAULT 0,
                    created_at      INTEGER NOT NULL,
                    completed_at    INTEGER,
                    updated_at      INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);
                CREATE INDEX IF NOT EXISTS idx_tasks_workflow ON tasks(workflow_name);
                CREATE INDEX IF NOT EXISTS idx_tasks_completed ON tasks(completed_at);
                ",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let path_str = path.to_str().unwrap();

        let db = Database::open(path_str).unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, workflow_name, state, created_at, updated_at)
                 VALUES ('t-1', 'default', 'queued', 0, 0)",
                [],
            )
        })
        .unwrap();
        drop(db);

        // reopening sees the persisted row
        let db = Database::open(path_str).unwrap();
        let count: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 1);
    }
}
