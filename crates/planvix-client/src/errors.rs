//! Transport failures seen by the reconnecting client.

use thiserror::Error;

/// A feed connection could not be opened or broke while open.
///
/// Every variant is handled the same way: the transport is closed and a
/// reconnect is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Handshake failed (refused, DNS, HTTP 401/503, ...).
    #[error("connect failed: {0}")]
    Connect(String),
    /// Read or write on an open socket failed.
    #[error("transport I/O: {0}")]
    Io(String),
    /// The socket is already closed.
    #[error("transport closed")]
    Closed,
}
