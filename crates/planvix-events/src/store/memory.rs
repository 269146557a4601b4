use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use planvix_core::{ActivityRecord, NewActivity};

use super::{EventLog, next_timestamp};
use crate::errors::Result;

#[derive(Default)]
struct Inner {
    records: VecDeque<ActivityRecord>,
    last_sequence: i64,
    total: u64,
}

/// Process-local activity log.
///
/// With a capacity, only the newest `capacity` records are retained; sequence
/// numbering and [`EventLog::count`] still cover every append.
#[derive(Default)]
pub struct MemoryEventLog {
    inner: Mutex<Inner>,
    capacity: Option<usize>,
}

impl MemoryEventLog {
    /// Unbounded log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log retaining at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::default(),
            capacity: Some(capacity.max(1)),
        }
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, activity: NewActivity) -> Result<ActivityRecord> {
        let mut inner = self.inner.lock();
        let last_ms = inner.records.back().map(|r| r.timestamp.timestamp_millis());
        let timestamp = next_timestamp(Utc::now(), last_ms);
        inner.last_sequence += 1;
        inner.total += 1;

        let record = ActivityRecord::assign(activity, inner.last_sequence, timestamp);
        inner.records.push_back(record.clone());
        if let Some(cap) = self.capacity {
            while inner.records.len() > cap {
                let _ = inner.records.pop_front();
            }
        }
        Ok(record)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ActivityRecord>> {
        let inner = self.inner.lock();
        let skip = inner.records.len().saturating_sub(limit);
        Ok(inner.records.iter().skip(skip).cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.lock().total)
    }
}
