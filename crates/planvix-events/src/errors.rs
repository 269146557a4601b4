//! Error types for the activity log.

use thiserror::Error;

/// The durable backend could not complete an append or read.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error (backend unreachable or exhausted).
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Attribute encoding/decoding error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// A stored row could not be turned back into a record.
    #[error("undecodable row: {0}")]
    Decode(String),

    /// The backend refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Internal error (e.g. a panicked blocking task).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for activity log results.
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_display() {
        let err = PersistenceError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn migration_error_display() {
        let err = PersistenceError::Migration {
            message: "v001 failed: table already exists".into(),
        };
        assert_eq!(
            err.to_string(),
            "migration error: v001 failed: table already exists"
        );
    }

    #[test]
    fn decode_error_display() {
        let err = PersistenceError::Decode("kind 'x' at sequence 4".into());
        assert_eq!(err.to_string(), "undecodable row: kind 'x' at sequence 4");
    }

    #[test]
    fn unavailable_display() {
        let err = PersistenceError::Unavailable("disk full".into());
        assert_eq!(err.to_string(), "store unavailable: disk full");
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("bad").unwrap_err();
        let err: PersistenceError = serde_err.into();
        assert!(matches!(err, PersistenceError::Serde(_)));
    }
}
