//! # planvix-client
//!
//! Consumer side of the activity feed. Keeps one logical subscription alive
//! across physical reconnects.
//!
//! - **[`ReconnectMachine`]**: pure state machine, no I/O or timers.
//! - **[`Backoff`]**: multiplicative reconnect delay between a floor and a ceiling.
//! - **[`ReconnectAgent`]**: async driver executing the machine's actions over
//!   a [`Connector`]; [`WsConnector`] is the `tokio-tungstenite` transport.

#![deny(unsafe_code)]

pub mod agent;
pub mod backoff;
pub mod errors;
pub mod machine;
pub mod transport;

pub use agent::{AgentConfig, AgentHandle, ReconnectAgent};
pub use backoff::Backoff;
pub use errors::TransportError;
pub use machine::{Action, AgentState, Input, ReconnectMachine};
pub use transport::{Connector, FeedTransport, WsConnector};
