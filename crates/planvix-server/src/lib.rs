//! # planvix-server
//!
//! Real-time admin activity feed.
//!
//! - **[`ActivityBroadcaster`]**: persists each published activity, then fans
//!   it out to every live subscriber in store sequence order.
//! - **[`SessionManager`]**: admission, replay-on-connect, liveness, and the
//!   live session set.
//! - **HTTP surface**: `/ws/admin/activity` (WebSocket feed),
//!   `/api/admin/logs`, `/api/admin/activity`, `/health`, `/metrics`.
//! - Graceful shutdown via `CancellationToken`.

#![deny(unsafe_code)]

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AdminIdentity, CredentialVerifier, Credentials, JwtVerifier, issue_admin_token};
pub use config::ServerConfig;
pub use errors::{AdmissionError, AuthRejected, BroadcastError, DeliveryError};
pub use server::FeedServer;
pub use websocket::broadcast::ActivityBroadcaster;
pub use websocket::manager::{SessionManager, SessionSlot};
pub use websocket::session::{CloseReason, SessionState, SubscriberSession};
