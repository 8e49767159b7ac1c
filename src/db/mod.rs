//! Database layer for the task tree engine.

pub mod access;
pub mod activities;
pub mod aggregates;
pub mod ancestry;
pub mod entries;
pub mod locks;
pub mod mutator;
pub mod projects;
pub mod tasks;

use crate::config::{Config, TreeSettings};
use crate::error::{TreeError, TreeResult};
use anyhow::Result;
use locks::ProjectLocks;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    locks: Arc<ProjectLocks>,
    settings: Arc<TreeSettings>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_settings(path, TreeSettings::default(), Duration::from_millis(5000))
    }

    /// Open the database described by a loaded configuration.
    pub fn open_from_config(config: &Config) -> Result<Self> {
        config.ensure_db_dir()?;
        Self::open_with_settings(
            &config.server.db_path,
            config.tree_settings(),
            Duration::from_millis(config.server.busy_timeout_ms),
        )
    }

    fn open_with_settings<P: AsRef<Path>>(
        path: P,
        settings: TreeSettings,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent readers
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(busy_timeout)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            locks: Arc::new(ProjectLocks::new()),
            settings: Arc::new(settings),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            locks: Arc::new(ProjectLocks::new()),
            settings: Arc::new(TreeSettings::default()),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Replace the runtime settings (limits and delete policy).
    pub fn with_settings(mut self, settings: TreeSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    pub fn settings(&self) -> &TreeSettings {
        &self.settings
    }

    pub fn locks(&self) -> &ProjectLocks {
        &self.locks
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> TreeResult<T>
    where
        F: FnOnce(&Connection) -> TreeResult<T>,
    {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T>(&self, f: F) -> TreeResult<T>
    where
        F: FnOnce(&mut Connection) -> TreeResult<T>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a new time-ordered id.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Build `?, ?, ?` for an IN clause of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

pub(crate) fn not_found_as_none<T>(result: rusqlite::Result<T>) -> TreeResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(TreeError::from(e)),
    }
}
