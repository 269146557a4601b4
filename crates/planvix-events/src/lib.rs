//! # planvix-events
//!
//! Append-only, totally ordered activity log.
//!
//! - **[`EventLog`]**: the store contract. `append` assigns the sequence
//!   number and timestamp; `recent(limit)` returns the newest records in
//!   ascending order.
//! - **[`SqliteEventLog`]**: durable backend over a `rusqlite` + `r2d2` pool.
//!   Blocking I/O runs on `spawn_blocking`.
//! - **[`MemoryEventLog`]**: process-local backend, optionally ring-buffered.

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{PersistenceError, Result};
pub use sqlite::{ConnectionConfig, ConnectionPool, new_file, new_in_memory, run_migrations};
pub use store::{EventLog, MemoryEventLog, SqliteEventLog};
