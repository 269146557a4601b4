//! Reconnect state machine.
//!
//! Pure: feeds on [`Input`]s and answers with [`Action`]s for the driver to
//! perform. No sockets, no timers, so every transition is unit-testable.
//!
//! ```text
//!  Idle ──connect──▶ Connecting ──opened──▶ Active
//!                      ▲    │                 │
//!          backoff     │    │ error/close     │ error/close
//!          elapsed     │    ▼                 │
//!                    BackoffWait ◀────────────┘
//!
//!  any ──disconnect──▶ Stopped (terminal)
//! ```

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::backoff::Backoff;

/// Where the agent is in its connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentState {
    /// Created, no connection requested yet.
    Idle,
    /// A transport is being opened.
    Connecting,
    /// Transport open; keepalive running.
    Active,
    /// Waiting out the reconnect delay.
    BackoffWait,
    /// Disconnected on request. Terminal.
    Stopped,
}

impl AgentState {
    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::BackoffWait => "backoff_wait",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    /// The caller wants to be connected.
    ConnectRequested,
    /// The transport finished opening.
    Opened,
    /// The transport closed, cleanly or not.
    Closed,
    /// Open failed, or a read/write on the open transport failed.
    TransportError,
    /// The reconnect delay ran out.
    BackoffElapsed,
    /// The caller wants to stop for good.
    DisconnectRequested,
}

/// Work the driver must perform, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Begin opening a transport.
    OpenTransport,
    /// Start sending `ping` at the keepalive interval.
    StartKeepalive,
    /// Stop the keepalive timer.
    StopKeepalive,
    /// Close the current transport, if any.
    CloseTransport,
    /// Feed [`Input::BackoffElapsed`] back after this delay.
    ScheduleReconnect(Duration),
}

/// The reconnect state machine.
#[derive(Clone, Debug)]
pub struct ReconnectMachine {
    state: AgentState,
    backoff: Backoff,
}

impl ReconnectMachine {
    /// An idle machine using `backoff` between attempts.
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: AgentState::Idle,
            backoff,
        }
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Whether the caller still wants a connection.
    pub fn wants_connection(&self) -> bool {
        !matches!(self.state, AgentState::Idle | AgentState::Stopped)
    }

    /// Delay the next scheduled reconnect would use.
    pub fn pending_delay(&self) -> Duration {
        self.backoff.peek()
    }

    /// Apply `input`, returning the actions to perform.
    ///
    /// Inputs that make no sense in the current state (a late `Opened` after
    /// a disconnect, a stale `BackoffElapsed`) are absorbed.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        use AgentState as S;

        let from = self.state;
        let actions = match (from, input) {
            (S::Stopped, Input::Opened) => vec![Action::CloseTransport],
            (S::Stopped, _) => Vec::new(),

            (_, Input::DisconnectRequested) => {
                self.state = S::Stopped;
                match from {
                    S::Active => vec![Action::StopKeepalive, Action::CloseTransport],
                    S::Connecting => vec![Action::CloseTransport],
                    _ => Vec::new(),
                }
            }

            (S::Idle, Input::ConnectRequested) | (S::BackoffWait, Input::BackoffElapsed) => {
                self.state = S::Connecting;
                vec![Action::OpenTransport]
            }

            (S::Connecting, Input::Opened) => {
                self.state = S::Active;
                self.backoff.reset();
                vec![Action::StartKeepalive]
            }

            (S::Connecting, Input::Closed) => self.schedule(Vec::new()),
            (S::Connecting, Input::TransportError) => self.schedule(vec![Action::CloseTransport]),
            (S::Active, Input::Closed) => self.schedule(vec![Action::StopKeepalive]),
            (S::Active, Input::TransportError) => {
                self.schedule(vec![Action::StopKeepalive, Action::CloseTransport])
            }

            _ => Vec::new(),
        };

        if self.state != from {
            debug!(from = %from, to = %self.state, ?input, "agent transition");
        }
        actions
    }

    fn schedule(&mut self, mut actions: Vec<Action>) -> Vec<Action> {
        self.state = AgentState::BackoffWait;
        actions.push(Action::ScheduleReconnect(self.backoff.next_delay()));
        actions
    }
}
