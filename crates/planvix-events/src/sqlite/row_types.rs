//! Raw `activity_log` rows.

use chrono::{DateTime, Utc};
use planvix_core::{ActivityKind, ActivityRecord, Attributes, Severity};
use rusqlite::Row;

use crate::errors::{PersistenceError, Result};

/// Column list matching [`ActivityRow::from_row`].
pub const ACTIVITY_COLUMNS: &str =
    "sequence, kind, summary, actor, severity, attributes, timestamp";

/// One `activity_log` row as stored.
#[derive(Clone, Debug)]
pub struct ActivityRow {
    /// Primary key.
    pub sequence: i64,
    /// Kind wire name.
    pub kind: String,
    /// Stored summary.
    pub summary: String,
    /// Acting principal.
    pub actor: String,
    /// Severity wire name.
    pub severity: String,
    /// Attributes as a JSON object.
    pub attributes: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

impl ActivityRow {
    /// Read a row selected with [`ACTIVITY_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sequence: row.get(0)?,
            kind: row.get(1)?,
            summary: row.get(2)?,
            actor: row.get(3)?,
            severity: row.get(4)?,
            attributes: row.get(5)?,
            timestamp: row.get(6)?,
        })
    }

    /// Decode into a record. Unknown kinds, severities, and unparseable
    /// timestamps are reported as [`PersistenceError::Decode`].
    pub fn into_record(self) -> Result<ActivityRecord> {
        let seq = self.sequence;
        let kind: ActivityKind = self
            .kind
            .parse()
            .map_err(|e| PersistenceError::Decode(format!("sequence {seq}: {e}")))?;
        let severity: Severity = self
            .severity
            .parse()
            .map_err(|e| PersistenceError::Decode(format!("sequence {seq}: {e}")))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| PersistenceError::Decode(format!("sequence {seq}: timestamp: {e}")))?
            .with_timezone(&Utc);
        let attributes: Attributes = serde_json::from_str(&self.attributes)?;

        Ok(ActivityRecord {
            sequence: seq,
            kind,
            timestamp,
            summary: self.summary,
            actor: self.actor,
            severity,
            attributes,
        })
    }
}
