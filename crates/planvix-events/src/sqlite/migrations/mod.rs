//! Schema migrations for the activity log database.
//!
//! Migrations are embedded with [`include_str!`] and applied in version
//! order, each inside its own transaction. Applied versions are tracked in
//! `schema_version`, so running the migrator twice is a no-op.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{PersistenceError, Result};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "activity_log table and indexes",
    sql: include_str!("v001_activity_log.sql"),
}];

/// Apply every pending migration. Returns how many were applied.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply(conn, migration)?;
        applied += 1;
    }

    if applied == 0 {
        debug!(version = current, "schema up to date");
    }
    Ok(applied)
}

/// Highest applied version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| migration_error(format!("failed to read schema_version: {e}")))
}

/// Latest version known to this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| migration_error(format!("failed to create schema_version: {e}")))
}

fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let v = migration.version;
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| migration_error(format!("v{v}: failed to begin transaction: {e}")))?;
    tx.execute_batch(migration.sql)
        .map_err(|e| migration_error(format!("v{v} ({}) failed: {e}", migration.description)))?;
    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description) \
             VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![v, migration.description],
        )
        .map_err(|e| migration_error(format!("v{v}: failed to record version: {e}")))?;
    tx.commit()
        .map_err(|e| migration_error(format!("v{v}: failed to commit: {e}")))
}

fn migration_error(message: String) -> PersistenceError {
    PersistenceError::Migration { message }
}
