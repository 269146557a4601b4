//! Subscriber session manager: admission, replay, liveness, and the live set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use planvix_events::EventLog;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::broadcast::PreparedEvent;
use super::session::{CloseReason, SessionState, SubscriberSession};
use crate::auth::{AdminIdentity, CredentialVerifier, Credentials};
use crate::config::ServerConfig;
use crate::errors::{AdmissionError, AuthRejected};
use crate::metrics::{
    FEED_SESSIONS_ACTIVE, FEED_SESSIONS_CLOSED_TOTAL, FEED_SESSIONS_OPENED_TOTAL,
};

/// Lifetime queue overflows after which a session is treated as dead.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// Replay re-reads allowed when live traffic outruns admission.
const MAX_REPLAY_REREADS: usize = 3;

/// A reserved place under the connection limit.
///
/// Counted from [`SessionManager::try_reserve`] until the session it admits
/// is disconnected. Dropped unused, it frees the place again.
#[derive(Debug)]
pub struct SessionSlot {
    count: Arc<AtomicUsize>,
    committed: bool,
}

impl SessionSlot {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if !self.committed {
            let _ = self.count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Owns every [`SubscriberSession`]. No other component changes session state.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SubscriberSession>>>,
    count: Arc<AtomicUsize>,
    log: Arc<dyn EventLog>,
    verifier: Arc<dyn CredentialVerifier>,
    replay_limit: usize,
    queue_capacity: usize,
    max_connections: usize,
    liveness_timeout: Duration,
}

impl SessionManager {
    /// Manager reading replays from `log` and admitting through `verifier`.
    pub fn new(
        log: Arc<dyn EventLog>,
        verifier: Arc<dyn CredentialVerifier>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            count: Arc::new(AtomicUsize::new(0)),
            log,
            verifier,
            replay_limit: config.replay_limit,
            queue_capacity: config.send_queue_capacity.max(config.replay_limit + 1),
            max_connections: config.max_connections,
            liveness_timeout: config.liveness_timeout,
        }
    }

    /// Run the credential gate. Happens before any session exists.
    pub fn authorize(&self, credentials: &Credentials) -> Result<AdminIdentity, AuthRejected> {
        self.verifier.verify(credentials)
    }

    /// Whether another session may be admitted.
    pub fn has_capacity(&self) -> bool {
        self.count() < self.max_connections
    }

    /// Claim a place under the connection limit, or `None` when full.
    pub fn try_reserve(&self) -> Option<SessionSlot> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_connections).then_some(n + 1)
            })
            .ok()
            .map(|_| SessionSlot {
                count: Arc::clone(&self.count),
                committed: false,
            })
    }

    /// Reserve a place and admit an authorized connection.
    pub async fn open_session(
        &self,
        identity: &AdminIdentity,
    ) -> Result<(Arc<SubscriberSession>, mpsc::Receiver<Arc<String>>), AdmissionError> {
        let slot = self.try_reserve().ok_or(AdmissionError::AtCapacity)?;
        self.admit(slot, identity).await
    }

    /// Admit an authorized connection into a reserved place.
    ///
    /// The session joins the live set in `connecting` before the replay read,
    /// so any event published from here on is either in the replay or
    /// buffered and flushed on activation. A failed replay read admits the
    /// session with an empty replay. If a burst overflows the buffer while
    /// the replay is read, the replay is read again.
    ///
    /// Returns the session and the receiving end of its outbound queue.
    pub async fn admit(
        &self,
        slot: SessionSlot,
        identity: &AdminIdentity,
    ) -> Result<(Arc<SubscriberSession>, mpsc::Receiver<Arc<String>>), AdmissionError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = format!("sub_{}", uuid::Uuid::now_v7());
        let session = Arc::new(SubscriberSession::new(id.clone(), tx));

        {
            let mut sessions = self.sessions.write().await;
            let _ = sessions.insert(id.clone(), Arc::clone(&session));
        }
        slot.commit();
        counter!(FEED_SESSIONS_OPENED_TOTAL).increment(1);
        gauge!(FEED_SESSIONS_ACTIVE).increment(1.0);

        let mut replay = self.read_replay(&id).await;
        for _ in 0..MAX_REPLAY_REREADS {
            if !session.take_overflow() {
                break;
            }
            debug!(session_id = %id, "live burst outran replay read, reading again");
            replay = self.read_replay(&id).await;
        }

        match session.activate(&replay) {
            Ok(sent) => {
                info!(
                    session_id = %id,
                    admin = %identity.subject,
                    replayed = replay.len(),
                    sent,
                    "subscriber admitted"
                );
                Ok((session, rx))
            }
            Err(error) => {
                warn!(session_id = %id, %error, "replay delivery failed");
                let _ = self.disconnect(&id, CloseReason::TransportError).await;
                Err(error.into())
            }
        }
    }

    async fn read_replay(&self, id: &str) -> Vec<PreparedEvent> {
        match self.log.recent(self.replay_limit).await {
            Ok(records) => records
                .iter()
                .filter_map(|r| PreparedEvent::from_record(r).ok())
                .collect(),
            Err(error) => {
                warn!(session_id = id, %error, "replay read failed, admitting with empty replay");
                Vec::new()
            }
        }
    }

    /// Sessions that should see the next published event.
    pub async fn snapshot(&self) -> Vec<Arc<SubscriberSession>> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .filter(|s| {
                matches!(
                    s.state(),
                    SessionState::Connecting | SessionState::Active
                )
            })
            .cloned()
            .collect()
    }

    /// Look up a live session.
    pub async fn get(&self, id: &str) -> Option<Arc<SubscriberSession>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Close and remove a session. Returns `false` if it was not live;
    /// repeated calls are no-ops.
    pub async fn disconnect(&self, id: &str, reason: CloseReason) -> bool {
        let removed = self.sessions.write().await.remove(id);
        let Some(session) = removed else {
            debug!(session_id = id, %reason, "disconnect for unknown session ignored");
            return false;
        };

        if reason.is_graceful() {
            let _ = session.begin_close();
        }
        let _ = session.close();
        let _ = self.count.fetch_sub(1, Ordering::AcqRel);
        counter!(FEED_SESSIONS_CLOSED_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(FEED_SESSIONS_ACTIVE).decrement(1.0);
        info!(
            session_id = id,
            %reason,
            age_secs = session.age().as_secs(),
            dropped = session.drop_count(),
            "subscriber disconnected"
        );
        true
    }

    /// Re-evaluate a session after a failed delivery and close it if it is
    /// dead. Returns whether it was closed.
    pub async fn recheck(&self, session: &SubscriberSession) -> bool {
        let reason = if session.queue_closed() {
            CloseReason::TransportError
        } else if session.drop_count() >= MAX_TOTAL_DROPS {
            CloseReason::SlowConsumer
        } else if session.idle_for() > self.liveness_timeout {
            CloseReason::LivenessTimeout
        } else {
            return false;
        };
        self.disconnect(&session.id, reason).await
    }

    /// Close every session (server shutdown).
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        let mut closed = 0;
        for id in ids {
            if self.disconnect(&id, reason).await {
                closed += 1;
            }
        }
        closed
    }

    /// Number of live sessions, counting reservations not yet admitted.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Configured liveness timeout.
    pub fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }

    /// The event log replays are read from.
    pub fn log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }
}
