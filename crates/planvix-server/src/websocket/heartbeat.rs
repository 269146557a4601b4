//! Per-session liveness watch.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::warn;

use super::manager::SessionManager;
use super::session::{CloseReason, SubscriberSession};

/// Outcome of the liveness watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessResult {
    /// No inbound traffic within the timeout.
    TimedOut,
    /// The session closed for some other reason.
    Closed,
}

/// Check `session` every `interval` until it has been silent for `timeout`
/// or closes.
pub async fn watch_liveness(
    session: Arc<SubscriberSession>,
    interval: Duration,
    timeout: Duration,
) -> LivenessResult {
    let mut ticker = time::interval(interval.min(timeout));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately.
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if session.idle_for() >= timeout {
                    return LivenessResult::TimedOut;
                }
            }
            () = session.closed() => return LivenessResult::Closed,
        }
    }
}

/// Run [`watch_liveness`] and close the session through `sessions` on timeout.
pub async fn enforce_liveness(
    sessions: Arc<SessionManager>,
    session: Arc<SubscriberSession>,
    interval: Duration,
) {
    let timeout = sessions.liveness_timeout();
    if watch_liveness(Arc::clone(&session), interval, timeout).await == LivenessResult::TimedOut {
        warn!(
            session_id = %session.id,
            idle_secs = session.idle_for().as_secs(),
            "no traffic within liveness timeout, closing"
        );
        let _ = sessions
            .disconnect(&session.id, CloseReason::LivenessTimeout)
            .await;
    }
}
