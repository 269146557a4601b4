//! # planvix-core
//!
//! Foundation types for the Planvix administrative activity feed.
//!
//! - [`activity`]: the closed set of activity kinds, severities, and the
//!   immutable [`ActivityRecord`] assigned by the event log
//! - [`wire`]: JSON framing shared by the feed server and its clients
//!   (replay/live event messages, the `"ping"` literal, the pong acknowledgement)
//! - [`logging`]: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod activity;
pub mod errors;
pub mod logging;
pub mod wire;

pub use activity::{ActivityKind, ActivityRecord, Attributes, NewActivity, Severity};
pub use errors::{MalformedMessage, UnknownKind};
pub use wire::{FeedEvent, Inbound, PING, decode_inbound, encode_event, pong_message};
