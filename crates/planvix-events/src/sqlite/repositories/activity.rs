//! Activity repository: append and tail reads over `activity_log`.
//!
//! The table's `AUTOINCREMENT` key is the log sequence, so numbers are never
//! reused even after rows are pruned by hand.

use chrono::{SecondsFormat, Utc};
use planvix_core::{ActivityRecord, NewActivity};
use rusqlite::{Connection, TransactionBehavior, params};
use tracing::warn;

use crate::errors::Result;
use crate::sqlite::row_types::{ACTIVITY_COLUMNS, ActivityRow};
use crate::store::next_timestamp;

/// Activity repository. Stateless, every method takes a connection.
pub struct ActivityRepo;

impl ActivityRepo {
    /// Append one activity, assigning its sequence and timestamp.
    ///
    /// Runs under `BEGIN IMMEDIATE` so concurrent writers on other pooled
    /// connections cannot interleave between reading the last timestamp and
    /// inserting.
    pub fn append(conn: &mut Connection, activity: NewActivity) -> Result<ActivityRecord> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last_ms: Option<i64> =
            tx.query_row("SELECT MAX(timestamp_ms) FROM activity_log", [], |row| {
                row.get(0)
            })?;
        let timestamp = next_timestamp(Utc::now(), last_ms);
        let summary = activity.resolved_summary();
        let attributes = serde_json::to_string(&activity.attributes)?;

        let _ = tx.execute(
            "INSERT INTO activity_log (kind, summary, actor, severity, attributes, timestamp, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                activity.kind.as_str(),
                summary,
                activity.actor,
                activity.severity.as_str(),
                attributes,
                timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                timestamp.timestamp_millis(),
            ],
        )?;
        let sequence = tx.last_insert_rowid();
        tx.commit()?;

        Ok(ActivityRecord::assign(activity, sequence, timestamp))
    }

    /// The newest `limit` records, oldest first.
    ///
    /// Rows that no longer decode are logged and skipped, so the result may
    /// hold fewer than `limit` records.
    pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<ActivityRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_log ORDER BY sequence DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], ActivityRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut records: Vec<ActivityRecord> = rows
            .into_iter()
            .filter_map(|row| {
                let sequence = row.sequence;
                row.into_record()
                    .inspect_err(|error| {
                        warn!(sequence, %error, "skipping undecodable activity row");
                    })
                    .ok()
            })
            .collect();
        records.reverse();
        Ok(records)
    }

    /// Total number of stored records.
    pub fn count(conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM activity_log", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
