//! Async driver for [`ReconnectMachine`].
//!
//! One background task owns the machine, the transport, and the keepalive
//! timer. It performs the machine's actions and turns socket events, timer
//! ticks, and the caller's disconnect into machine inputs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use planvix_core::{FeedEvent, Inbound, PING, decode_inbound};
use planvix_settings::ClientSettings;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::errors::TransportError;
use crate::machine::{Action, AgentState, Input, ReconnectMachine};
use crate::transport::{Connector, FeedTransport};

/// Agent timing.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    /// Interval between `ping` messages while connected.
    pub keepalive_interval: Duration,
    /// Reconnect delay policy.
    pub backoff: Backoff,
}

impl AgentConfig {
    /// Build from the `client` settings block.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            keepalive_interval: Duration::from_millis(settings.keepalive_interval_ms),
            backoff: Backoff::new(
                Duration::from_millis(settings.reconnect_floor_ms),
                Duration::from_millis(settings.reconnect_ceiling_ms),
                settings.reconnect_factor,
            ),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

/// Control handle of a running agent.
pub struct AgentHandle {
    stop: CancellationToken,
    state: watch::Receiver<AgentState>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Current state.
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// A receiver of state changes.
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    /// Wait until the agent reaches `state`.
    pub async fn wait_for(&self, state: AgentState) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|s| *s == state).await;
    }

    /// Stop for good: no further reconnects, keepalive stopped, transport closed.
    /// Returns once the agent task has exited.
    pub async fn disconnect(self) {
        self.stop.cancel();
        if let Err(error) = self.task.await {
            warn!(%error, "feed agent task failed");
        }
    }
}

/// Keeps one logical feed subscription alive across reconnects.
pub struct ReconnectAgent<H> {
    connector: Arc<dyn Connector>,
    keepalive_interval: Duration,
    machine: ReconnectMachine,
    handler: H,
    transport: Option<Box<dyn FeedTransport>>,
    keepalive: Option<Interval>,
    state_tx: watch::Sender<AgentState>,
    stop: CancellationToken,
}

enum Wake {
    Stop,
    Frame(Option<Result<String, TransportError>>),
    Keepalive,
}

impl<H> ReconnectAgent<H>
where
    H: FnMut(FeedEvent) + Send + 'static,
{
    /// Start connecting in the background. Every feed event is passed to
    /// `handler` in arrival order; pongs and malformed frames are not.
    pub fn spawn(connector: Arc<dyn Connector>, config: AgentConfig, handler: H) -> AgentHandle {
        let (state_tx, state_rx) = watch::channel(AgentState::Idle);
        let stop = CancellationToken::new();
        let agent = Self {
            connector,
            keepalive_interval: config.keepalive_interval,
            machine: ReconnectMachine::new(config.backoff),
            handler,
            transport: None,
            keepalive: None,
            state_tx,
            stop: stop.clone(),
        };
        let task = tokio::spawn(agent.run());
        AgentHandle {
            stop,
            state: state_rx,
            task,
        }
    }

    async fn run(mut self) {
        let mut queue = VecDeque::new();
        self.step(Input::ConnectRequested, &mut queue);

        loop {
            while let Some(action) = queue.pop_front() {
                self.perform(action, &mut queue).await;
            }
            match self.machine.state() {
                AgentState::Active => {
                    let input = self.wait_active().await;
                    self.step(input, &mut queue);
                }
                AgentState::Stopped | AgentState::Idle => break,
                // Connecting and BackoffWait always leave an action queued.
                AgentState::Connecting | AgentState::BackoffWait => {
                    if queue.is_empty() {
                        break;
                    }
                }
            }
        }
        self.keepalive = None;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        info!("feed agent stopped");
    }

    fn step(&mut self, input: Input, queue: &mut VecDeque<Action>) {
        queue.extend(self.machine.handle(input));
        let _ = self.state_tx.send_replace(self.machine.state());
    }

    async fn perform(&mut self, action: Action, queue: &mut VecDeque<Action>) {
        match action {
            Action::OpenTransport => {
                let outcome = tokio::select! {
                    () = self.stop.cancelled() => None,
                    result = self.connector.connect() => Some(result),
                };
                let input = match outcome {
                    None => Input::DisconnectRequested,
                    Some(Ok(transport)) => {
                        self.transport = Some(transport);
                        Input::Opened
                    }
                    Some(Err(error)) => {
                        warn!(%error, "feed connect failed");
                        Input::TransportError
                    }
                };
                self.step(input, queue);
            }
            Action::StartKeepalive => {
                let mut interval = tokio::time::interval_at(
                    Instant::now() + self.keepalive_interval,
                    self.keepalive_interval,
                );
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.keepalive = Some(interval);
            }
            Action::StopKeepalive => self.keepalive = None,
            Action::CloseTransport => {
                if let Some(mut transport) = self.transport.take() {
                    transport.close().await;
                }
            }
            Action::ScheduleReconnect(delay) => {
                info!(delay_ms = delay.as_millis(), "feed reconnect scheduled");
                let input = tokio::select! {
                    () = self.stop.cancelled() => Input::DisconnectRequested,
                    () = tokio::time::sleep(delay) => Input::BackoffElapsed,
                };
                self.step(input, queue);
            }
        }
    }

    /// Serve the open transport until something changes the machine state.
    async fn wait_active(&mut self) -> Input {
        loop {
            let wake = {
                let (Some(transport), Some(keepalive)) =
                    (self.transport.as_mut(), self.keepalive.as_mut())
                else {
                    return Input::Closed;
                };
                tokio::select! {
                    () = self.stop.cancelled() => Wake::Stop,
                    frame = transport.recv_text() => Wake::Frame(frame),
                    _ = keepalive.tick() => Wake::Keepalive,
                }
            };

            match wake {
                Wake::Stop => return Input::DisconnectRequested,
                Wake::Frame(None) => {
                    info!("feed closed by server");
                    // Already closed; nothing left to tear down.
                    self.transport = None;
                    return Input::Closed;
                }
                Wake::Frame(Some(Err(error))) => {
                    warn!(%error, "feed read failed");
                    return Input::TransportError;
                }
                Wake::Frame(Some(Ok(text))) => self.dispatch(&text),
                Wake::Keepalive => {
                    let Some(transport) = self.transport.as_mut() else {
                        return Input::Closed;
                    };
                    if let Err(error) = transport.send_text(PING).await {
                        warn!(%error, "keepalive send failed");
                        return Input::TransportError;
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, text: &str) {
        match decode_inbound(text) {
            Ok(Inbound::Pong) => {}
            Ok(Inbound::Event(event)) => (self.handler)(event),
            Err(error) => debug!(%error, "discarding malformed feed frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    type FrameTx = mpsc::UnboundedSender<Result<String, TransportError>>;

    /// Transport fed by the test through a channel.
    struct FakeTransport {
        frames: mpsc::UnboundedReceiver<Result<String, TransportError>>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FeedTransport for FakeTransport {
        async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
            self.frames.recv().await
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Test side of one scripted connection.
    struct Link {
        frames: FrameTx,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    enum Outcome {
        Refuse,
        Accept(FakeTransport),
    }

    /// Connector replaying a script of outcomes; hangs once it runs out.
    #[derive(Default)]
    struct ScriptedConnector {
        script: Mutex<VecDeque<Outcome>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn refuse(&self) {
            self.script.lock().push_back(Outcome::Refuse);
        }

        fn accept(&self) -> Link {
            let (frames, rx) = mpsc::unbounded_channel();
            let sent = Arc::new(Mutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            self.script.lock().push_back(Outcome::Accept(FakeTransport {
                frames: rx,
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            }));
            Link {
                frames,
                sent,
                closed,
            }
        }

        fn attempt_gaps(&self) -> Vec<u64> {
            self.attempts
                .lock()
                .windows(2)
                .map(|w| (w[1] - w[0]).as_secs())
                .collect()
        }

        fn attempts(&self) -> usize {
            self.attempts.lock().len()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> Result<Box<dyn FeedTransport>, TransportError> {
            self.attempts.lock().push(Instant::now());
            let next = self.script.lock().pop_front();
            match next {
                Some(Outcome::Accept(transport)) => Ok(Box::new(transport)),
                Some(Outcome::Refuse) => Err(TransportError::Connect("refused".into())),
                None => std::future::pending().await,
            }
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            keepalive_interval: Duration::from_secs(25),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 2.0),
        }
    }

    fn spawn_collecting(
        connector: &Arc<ScriptedConnector>,
    ) -> (AgentHandle, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ReconnectAgent::spawn(
            Arc::clone(connector) as Arc<dyn Connector>,
            config(),
            move |event: FeedEvent| {
                let _ = tx.send(event);
            },
        );
        (handle, rx)
    }

    fn event(kind: &str, sequence: i64) -> String {
        format!(r#"{{"type":"{kind}","details":"d","sequence":{sequence}}}"#)
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_events_but_not_pongs_or_garbage() {
        let connector = Arc::new(ScriptedConnector::default());
        let link = connector.accept();
        let (handle, mut events) = spawn_collecting(&connector);

        for frame in [
            event("user_signup", 1),
            r#"{"type":"pong"}"#.to_string(),
            "not json".to_string(),
            r#"{"no_type":true}"#.to_string(),
            event("admin_login", 2),
        ] {
            link.frames.send(Ok(frame)).unwrap();
        }

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.sequence, Some(1));
        assert_eq!(second.event_type, "admin_login");
        assert_eq!(handle.state(), AgentState::Active);

        handle.disconnect().await;
        assert!(events.try_recv().is_err());
        assert!(link.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_while_active() {
        let connector = Arc::new(ScriptedConnector::default());
        let link = connector.accept();
        let (handle, _events) = spawn_collecting(&connector);
        handle.wait_for(AgentState::Active).await;

        tokio::time::sleep(Duration::from_secs(76)).await;
        assert_eq!(*link.sent.lock(), vec![PING, PING, PING]);
        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempts_back_off_multiplicatively() {
        let connector = Arc::new(ScriptedConnector::default());
        for _ in 0..5 {
            connector.refuse();
        }
        let _link = connector.accept();
        let (handle, _events) = spawn_collecting(&connector);

        handle.wait_for(AgentState::Active).await;
        assert_eq!(connector.attempts(), 6);
        assert_eq!(connector.attempt_gaps(), vec![1, 2, 4, 8, 8]);
        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn successful_connection_resets_backoff() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.refuse();
        connector.refuse();
        let first = connector.accept();
        connector.refuse();
        let _second = connector.accept();
        let (handle, _events) = spawn_collecting(&connector);

        handle.wait_for(AgentState::Active).await;
        drop(first.frames);
        handle.wait_for(AgentState::BackoffWait).await;
        handle.wait_for(AgentState::Active).await;

        // 1s, 2s, then connected; after the drop: floor again (1s), then 2s.
        assert_eq!(connector.attempt_gaps(), vec![1, 2, 1, 2]);
        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_closes_transport_and_reconnects() {
        let connector = Arc::new(ScriptedConnector::default());
        let first = connector.accept();
        let second = connector.accept();
        let (handle, mut events) = spawn_collecting(&connector);

        handle.wait_for(AgentState::Active).await;
        first
            .frames
            .send(Err(TransportError::Io("reset".into())))
            .unwrap();
        handle.wait_for(AgentState::BackoffWait).await;
        assert!(first.closed.load(Ordering::SeqCst));

        handle.wait_for(AgentState::Active).await;
        second.frames.send(Ok(event("payment_received", 9))).unwrap();
        assert_eq!(events.recv().await.unwrap().sequence, Some(9));
        assert_eq!(connector.attempts(), 2);
        handle.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_backoff_stops_for_good() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.refuse();
        let (handle, _events) = spawn_collecting(&connector);
        handle.wait_for(AgentState::BackoffWait).await;

        let mut state = handle.watch_state();
        handle.disconnect().await;
        assert_eq!(*state.borrow_and_update(), AgentState::Stopped);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_connecting() {
        let connector = Arc::new(ScriptedConnector::default());
        let (handle, _events) = spawn_collecting(&connector);
        handle.wait_for(AgentState::Connecting).await;
        handle.disconnect().await;
        assert_eq!(connector.attempts(), 1);
    }

    #[test]
    fn config_from_settings() {
        let settings = ClientSettings {
            keepalive_interval_ms: 5_000,
            reconnect_floor_ms: 250,
            reconnect_ceiling_ms: 4_000,
            reconnect_factor: 3.0,
        };
        let config = AgentConfig::from_settings(&settings);
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));
        assert_eq!(config.backoff.floor(), Duration::from_millis(250));
        assert_eq!(config.backoff.ceiling(), Duration::from_secs(4));
    }
}
