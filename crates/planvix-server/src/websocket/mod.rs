//! Live feed over WebSocket: sessions, the session manager, fan-out, and
//! liveness.

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod manager;
pub mod session;
