//! The [`EventLog`] contract and its backends.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use planvix_core::{ActivityRecord, NewActivity};

use crate::errors::Result;

pub use memory::MemoryEventLog;
pub use sqlite::SqliteEventLog;

/// Append-only, totally ordered store of activity records.
///
/// Implementations guarantee that sequences strictly increase in append
/// order and that timestamps never decrease.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Durably record one activity, assigning its sequence and timestamp.
    async fn append(&self, activity: NewActivity) -> Result<ActivityRecord>;

    /// The newest `limit` records in ascending sequence order.
    async fn recent(&self, limit: usize) -> Result<Vec<ActivityRecord>>;

    /// Number of records in the log.
    async fn count(&self) -> Result<u64>;
}

/// Timestamp for the next append: `now` at millisecond precision, clamped so
/// it is never earlier than the previous record's.
pub fn next_timestamp(now: DateTime<Utc>, last_ms: Option<i64>) -> DateTime<Utc> {
    let now = now
        .duration_trunc(TimeDelta::milliseconds(1))
        .unwrap_or(now);
    match last_ms.and_then(DateTime::from_timestamp_millis) {
        Some(last) if last > now => last,
        _ => now,
    }
}
