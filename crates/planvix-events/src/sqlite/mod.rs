//! `SQLite` backend for the activity log.
//!
//! - **[`connection`]**: `r2d2` pool with WAL mode and busy-timeout pragmas
//!   applied to every connection.
//! - **[`migrations`]**: version-tracked schema, embedded at compile time.
//! - **[`row_types`]**: raw row struct and its decoding into a record.
//! - **[`repositories`]**: stateless SQL; every method takes a connection.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use migrations::run_migrations;
