//! One live administrator connection.
//!
//! A session starts in [`SessionState::Connecting`]. While connecting, live
//! events are buffered instead of sent so the replay batch can go out first;
//! [`SubscriberSession::activate`] sends the replay, flushes the buffer past
//! the replay watermark, and flips the session to active under one lock.
//!
//! The buffer holds at most one queue's worth of events. A burst beyond that
//! evicts the oldest and marks the replay stale, see
//! [`SubscriberSession::take_overflow`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::broadcast::PreparedEvent;
use crate::errors::DeliveryError;

/// Lifecycle of a subscriber session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Admitted, replay not yet sent.
    Connecting,
    /// Receiving live pushes.
    Active,
    /// Shutting down cleanly.
    Closing,
    /// Gone. Terminal.
    Closed,
}

impl SessionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Active | Self::Closing | Self::Closed)
                | (Self::Active, Self::Closing | Self::Closed)
                | (Self::Closing, Self::Closed)
        )
    }
}

/// Why a session was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or hung up.
    ClientClosed,
    /// Reading from or writing to the socket failed.
    TransportError,
    /// No traffic within the liveness timeout.
    LivenessTimeout,
    /// The outbound queue kept overflowing.
    SlowConsumer,
    /// The server is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::LivenessTimeout => "liveness_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::ServerShutdown => "server_shutdown",
        }
    }

    /// Closes that pass through [`SessionState::Closing`]. Transport
    /// failures and dead peers go straight to closed.
    pub fn is_graceful(self) -> bool {
        matches!(self, Self::ClientClosed | Self::ServerShutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    state: SessionState,
    pending: VecDeque<PreparedEvent>,
    overflowed: bool,
}

/// Point-in-time view of a session's liveness bookkeeping.
#[derive(Clone, Copy, Debug)]
pub struct LivenessSnapshot {
    /// Last inbound frame of any kind.
    pub last_activity: Instant,
    /// Last `"ping"` received.
    pub last_ping_at: Option<Instant>,
    /// Last pong acknowledgement sent.
    pub last_pong_at: Option<Instant>,
}

/// A subscriber connection as seen by the session manager and broadcaster.
pub struct SubscriberSession {
    /// Opaque id (`sub_<uuid>`).
    pub id: String,
    inner: Mutex<Inner>,
    tx: mpsc::Sender<Arc<String>>,
    connected_at: Instant,
    liveness: Mutex<LivenessSnapshot>,
    dropped: AtomicU64,
    closed: CancellationToken,
}

impl SubscriberSession {
    /// New session in `connecting`, writing into `tx`.
    pub fn new(id: String, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            inner: Mutex::new(Inner {
                state: SessionState::Connecting,
                pending: VecDeque::new(),
                overflowed: false,
            }),
            tx,
            connected_at: now,
            liveness: Mutex::new(LivenessSnapshot {
                last_activity: now,
                last_ping_at: None,
                last_pong_at: None,
            }),
            dropped: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Hand a live event to this session.
    ///
    /// Connecting sessions buffer it; active sessions enqueue it for the
    /// writer without waiting.
    pub fn deliver(&self, event: &PreparedEvent) -> Result<(), DeliveryError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Connecting => {
                if inner.pending.len() >= self.tx.max_capacity() {
                    let _ = inner.pending.pop_front();
                    inner.overflowed = true;
                }
                inner.pending.push_back(event.clone());
                Ok(())
            }
            SessionState::Active => self.enqueue(Arc::clone(&event.json)),
            SessionState::Closing | SessionState::Closed => Err(DeliveryError::SessionClosed),
        }
    }

    /// Enqueue a control message (pong) regardless of replay progress.
    pub fn send_direct(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        if self.state() == SessionState::Closed {
            return Err(DeliveryError::SessionClosed);
        }
        self.enqueue(message)
    }

    /// Whether buffered live events were evicted since the last call.
    ///
    /// A `true` answer means a replay read before now may end well short of
    /// the oldest buffered event; read it again before [`Self::activate`].
    pub fn take_overflow(&self) -> bool {
        std::mem::take(&mut self.inner.lock().overflowed)
    }

    /// Send the replay batch, flush buffered live events newer than the
    /// replay, and become active. Returns the number of messages enqueued.
    ///
    /// Only the newest messages that fit the free queue space are sent; the
    /// writer is not draining yet.
    pub fn activate(&self, replay: &[PreparedEvent]) -> Result<usize, DeliveryError> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Connecting {
            return Err(DeliveryError::SessionClosed);
        }
        let watermark = replay.last().map_or(i64::MIN, |e| e.sequence);
        let pending = std::mem::take(&mut inner.pending);
        let batch: Vec<&PreparedEvent> = replay
            .iter()
            .chain(pending.iter().filter(|e| e.sequence > watermark))
            .collect();
        let skip = batch.len().saturating_sub(self.tx.capacity());
        for event in &batch[skip..] {
            self.enqueue(Arc::clone(&event.json))?;
        }
        inner.overflowed = false;
        inner.state = SessionState::Active;
        Ok(batch.len() - skip)
    }

    /// Move to `closing`. Returns `false` if already closing or closed.
    pub fn begin_close(&self) -> bool {
        self.transition(SessionState::Closing)
    }

    /// Move to `closed` and wake everything waiting on [`Self::closed`].
    /// Returns `false` if the session was already closed.
    pub fn close(&self) -> bool {
        let changed = self.transition(SessionState::Closed);
        if changed {
            self.inner.lock().pending.clear();
            self.closed.cancel();
        }
        changed
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Record inbound traffic.
    pub fn touch(&self) {
        self.liveness.lock().last_activity = Instant::now();
    }

    /// Record a `"ping"` (also counts as traffic).
    pub fn record_ping(&self) {
        let now = Instant::now();
        let mut liveness = self.liveness.lock();
        liveness.last_activity = now;
        liveness.last_ping_at = Some(now);
    }

    /// Record an outbound pong acknowledgement.
    pub fn record_pong(&self) {
        self.liveness.lock().last_pong_at = Some(Instant::now());
    }

    /// Liveness bookkeeping.
    pub fn liveness(&self) -> LivenessSnapshot {
        *self.liveness.lock()
    }

    /// Time since the last inbound traffic.
    pub fn idle_for(&self) -> Duration {
        self.liveness.lock().last_activity.elapsed()
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Messages dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the writer side has gone away.
    pub fn queue_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn enqueue(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(DeliveryError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::ChannelClosed),
        }
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.can_transition_to(next) {
            inner.state = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(sequence: i64) -> PreparedEvent {
        PreparedEvent {
            sequence,
            json: Arc::new(format!(r#"{{"sequence":{sequence}}}"#)),
        }
    }

    fn session(capacity: usize) -> (SubscriberSession, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SubscriberSession::new("sub_test".into(), tx), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.to_string());
        }
        out
    }

    #[test]
    fn state_transitions() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Active));
        assert!(Connecting.can_transition_to(Closed));
        assert!(Active.can_transition_to(Closing));
        assert!(Active.can_transition_to(Closed));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Active.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Closed));
        assert!(!Closing.can_transition_to(Active));
    }

    #[test]
    fn connecting_session_buffers_live_events() {
        let (s, mut rx) = session(8);
        s.deliver(&event(5)).unwrap();
        assert!(drain(&mut rx).is_empty());
        assert_eq!(s.state(), SessionState::Connecting);
    }

    #[test]
    fn activate_sends_replay_then_newer_buffered() {
        let (s, mut rx) = session(8);
        // 3 arrived live after registration but was also read by recent().
        s.deliver(&event(3)).unwrap();
        s.deliver(&event(4)).unwrap();
        let sent = s.activate(&[event(1), event(2), event(3)]).unwrap();
        assert_eq!(sent, 4);
        assert_eq!(
            drain(&mut rx),
            vec![
                r#"{"sequence":1}"#,
                r#"{"sequence":2}"#,
                r#"{"sequence":3}"#,
                r#"{"sequence":4}"#
            ]
        );
        assert_eq!(s.state(), SessionState::Active);
    }

    #[test]
    fn activate_with_empty_replay_flushes_everything() {
        let (s, mut rx) = session(8);
        s.deliver(&event(7)).unwrap();
        assert_eq!(s.activate(&[]).unwrap(), 1);
        assert_eq!(drain(&mut rx), vec![r#"{"sequence":7}"#]);
    }

    #[test]
    fn connecting_buffer_keeps_newest_and_flags_overflow() {
        let (s, mut rx) = session(4);
        for seq in 1..=6 {
            s.deliver(&event(seq)).unwrap();
        }
        assert!(s.take_overflow());
        assert!(!s.take_overflow());

        assert_eq!(s.activate(&[]).unwrap(), 4);
        assert_eq!(
            drain(&mut rx),
            vec![
                r#"{"sequence":3}"#,
                r#"{"sequence":4}"#,
                r#"{"sequence":5}"#,
                r#"{"sequence":6}"#
            ]
        );
    }

    #[test]
    fn activate_trims_oldest_to_fit_queue() {
        let (s, mut rx) = session(3);
        s.deliver(&event(4)).unwrap();
        s.deliver(&event(5)).unwrap();
        assert_eq!(s.activate(&[event(1), event(2), event(3)]).unwrap(), 3);
        assert_eq!(
            drain(&mut rx),
            vec![
                r#"{"sequence":3}"#,
                r#"{"sequence":4}"#,
                r#"{"sequence":5}"#
            ]
        );
        assert_eq!(s.state(), SessionState::Active);
        assert_eq!(s.drop_count(), 0);
    }

    #[test]
    fn active_session_enqueues_directly() {
        let (s, mut rx) = session(8);
        let _ = s.activate(&[]).unwrap();
        s.deliver(&event(1)).unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn full_queue_counts_drop() {
        let (s, _rx) = session(1);
        let _ = s.activate(&[]).unwrap();
        s.deliver(&event(1)).unwrap();
        assert_eq!(s.deliver(&event(2)), Err(DeliveryError::QueueFull));
        assert_eq!(s.drop_count(), 1);
    }

    #[test]
    fn dropped_receiver_is_channel_closed() {
        let (s, rx) = session(4);
        let _ = s.activate(&[]).unwrap();
        drop(rx);
        assert!(s.queue_closed());
        assert_eq!(s.deliver(&event(1)), Err(DeliveryError::ChannelClosed));
    }

    #[test]
    fn closed_session_rejects_delivery() {
        let (s, _rx) = session(4);
        let _ = s.activate(&[]).unwrap();
        assert!(s.close());
        assert_eq!(s.deliver(&event(1)), Err(DeliveryError::SessionClosed));
        assert_eq!(
            s.send_direct(Arc::new("x".into())),
            Err(DeliveryError::SessionClosed)
        );
    }

    #[test]
    fn close_is_idempotent() {
        let (s, _rx) = session(4);
        assert!(s.begin_close());
        assert!(!s.begin_close());
        assert!(s.close());
        assert!(!s.close());
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn activate_after_close_fails() {
        let (s, _rx) = session(4);
        assert!(s.close());
        assert_eq!(s.activate(&[]), Err(DeliveryError::SessionClosed));
    }

    #[tokio::test]
    async fn closed_future_resolves_after_close() {
        let (s, _rx) = session(4);
        let s = Arc::new(s);
        let waiter = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.closed().await })
        };
        let _ = s.close();
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_bookkeeping() {
        let (s, _rx) = session(4);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(s.idle_for(), Duration::from_secs(10));

        s.record_ping();
        s.record_pong();
        let snap = s.liveness();
        assert!(snap.last_ping_at.is_some());
        assert!(snap.last_pong_at.is_some());
        assert_eq!(s.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(3)).await;
        s.touch();
        assert_eq!(s.idle_for(), Duration::ZERO);
        assert_eq!(s.age(), Duration::from_secs(13));
    }

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::LivenessTimeout.to_string(), "liveness_timeout");
        assert!(CloseReason::ClientClosed.is_graceful());
        assert!(!CloseReason::TransportError.is_graceful());
    }
}
