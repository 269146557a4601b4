use std::path::Path;

use async_trait::async_trait;
use planvix_core::{ActivityRecord, NewActivity};
use tracing::{debug, info};

use super::EventLog;
use crate::errors::{PersistenceError, Result};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::ActivityRepo;

/// Durable activity log backed by `SQLite`.
///
/// Each call checks a connection out of the pool on a blocking thread.
#[derive(Clone)]
pub struct SqliteEventLog {
    pool: ConnectionPool,
}

impl SqliteEventLog {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let pool = connection::new_file(&path.to_string_lossy(), config)?;
        info!(path = %path.display(), "opened activity log");
        Self::from_pool(pool)
    }

    /// Single-connection in-memory database.
    pub fn in_memory() -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        Self::from_pool(pool)
    }

    /// Wrap an existing pool, applying pending migrations.
    pub fn from_pool(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        debug!(applied, "activity log schema ready");
        drop(conn);
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| PersistenceError::Internal(format!("blocking task failed: {e}")))?
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, activity: NewActivity) -> Result<ActivityRecord> {
        self.with_conn(move |conn| ActivityRepo::append(conn, activity))
            .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ActivityRecord>> {
        self.with_conn(move |conn| ActivityRepo::recent(conn, limit))
            .await
    }

    async fn count(&self) -> Result<u64> {
        self.with_conn(|conn| ActivityRepo::count(conn)).await
    }
}
