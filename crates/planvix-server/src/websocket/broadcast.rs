//! Persist-then-fan-out of activity events.

use std::sync::Arc;

use metrics::counter;
use planvix_core::{ActivityKind, ActivityRecord, Attributes, NewActivity, encode_event};
use planvix_events::EventLog;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::manager::SessionManager;
use crate::errors::BroadcastError;
use crate::metrics::{
    FEED_DELIVERIES_TOTAL, FEED_DELIVERY_FAILURES_TOTAL, FEED_EVENTS_PUBLISHED_TOTAL,
    FEED_PUBLISH_FAILURES_TOTAL,
};

/// A stored record serialized once for every recipient.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedEvent {
    /// Log sequence of the record.
    pub sequence: i64,
    /// Wire JSON.
    pub json: Arc<String>,
}

impl PreparedEvent {
    /// Encode a record for the wire.
    pub fn from_record(record: &ActivityRecord) -> Result<Self, serde_json::Error> {
        Ok(Self {
            sequence: record.sequence,
            json: Arc::new(serde_json::to_string(&encode_event(record))?),
        })
    }
}

/// The single in-process hub producers publish through.
///
/// Constructed once at startup and handed to every producer as an `Arc`.
pub struct ActivityBroadcaster {
    pipeline: Pipeline,
}

impl ActivityBroadcaster {
    /// Broadcaster appending to `log` and delivering to `sessions`.
    pub fn new(log: Arc<dyn EventLog>, sessions: Arc<SessionManager>) -> Self {
        Self {
            pipeline: Pipeline {
                log,
                sessions,
                gate: Arc::new(Mutex::new(())),
            },
        }
    }

    /// Record an activity and push it to every live session.
    pub async fn publish(
        &self,
        kind: ActivityKind,
        summary: impl Into<String>,
        attributes: Attributes,
    ) -> Result<ActivityRecord, BroadcastError> {
        self.publish_activity(NewActivity::new(kind, summary).with_attributes(attributes))
            .await
    }

    /// Record a fully described activity and push it to every live session.
    ///
    /// Fails only if the append (or encoding) fails, in which case no
    /// session receives anything. Per-session delivery failures are logged
    /// and handed to the session manager.
    ///
    /// Append and fan-out run together on their own task. Dropping the
    /// returned future does not stop a started publish half way.
    pub async fn publish_activity(
        &self,
        activity: NewActivity,
    ) -> Result<ActivityRecord, BroadcastError> {
        tokio::spawn(self.pipeline.clone().run(activity))
            .await
            .map_err(|error| BroadcastError::Aborted(error.to_string()))?
    }

    /// Publish on a background task, logging instead of returning failures.
    ///
    /// For producers whose own operation must not wait on or fail with the feed.
    pub fn spawn_publish(&self, activity: NewActivity) -> JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            if let Err(error) = pipeline.run(activity).await {
                warn!(%error, "detached publish failed");
            }
        })
    }

    /// The session manager deliveries go through.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.pipeline.sessions
    }
}

#[derive(Clone)]
struct Pipeline {
    log: Arc<dyn EventLog>,
    sessions: Arc<SessionManager>,
    // Held across append and fan-out so live order equals log order.
    gate: Arc<Mutex<()>>,
}

impl Pipeline {
    async fn run(self, activity: NewActivity) -> Result<ActivityRecord, BroadcastError> {
        let kind = activity.kind;
        let guard = self.gate.lock().await;

        let record = match self.log.append(activity).await {
            Ok(record) => record,
            Err(error) => {
                counter!(FEED_PUBLISH_FAILURES_TOTAL).increment(1);
                warn!(%kind, %error, "activity not persisted, nothing delivered");
                return Err(error.into());
            }
        };
        let event = PreparedEvent::from_record(&record).inspect_err(|error| {
            counter!(FEED_PUBLISH_FAILURES_TOTAL).increment(1);
            warn!(%kind, sequence = record.sequence, %error, "failed to encode activity");
        })?;

        let recipients = self.sessions.snapshot().await;
        let mut delivered = 0_u64;
        let mut failed = Vec::new();
        for session in recipients {
            match session.deliver(&event) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    warn!(session_id = %session.id, sequence = record.sequence, %error, "delivery failed");
                    failed.push(session);
                }
            }
        }
        drop(guard);

        counter!(FEED_EVENTS_PUBLISHED_TOTAL, "kind" => kind.as_str()).increment(1);
        counter!(FEED_DELIVERIES_TOTAL).increment(delivered);
        counter!(FEED_DELIVERY_FAILURES_TOTAL).increment(failed.len() as u64);
        debug!(
            %kind,
            sequence = record.sequence,
            recipients = delivered,
            failed = failed.len(),
            "activity published"
        );

        for session in failed {
            let _ = self.sessions.recheck(&session).await;
        }
        Ok(record)
    }
}
