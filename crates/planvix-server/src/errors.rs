//! Error taxonomy of the feed server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use planvix_events::PersistenceError;
use serde_json::json;
use thiserror::Error;

/// A publish that did not complete.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The event log rejected the append; the event is lost.
    #[error("event not persisted: {0}")]
    Persistence(#[from] PersistenceError),
    /// The stored record could not be serialized for the wire.
    #[error("event not encodable: {0}")]
    Encode(#[from] serde_json::Error),
    /// The publish task panicked or the runtime shut down under it. The
    /// event may or may not be in the log.
    #[error("publish aborted: {0}")]
    Aborted(String),
}

/// Delivery to a single session failed. Never escapes the broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The session's outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,
    /// The session's writer task has gone away.
    #[error("outbound channel closed")]
    ChannelClosed,
    /// The session is closing or closed.
    #[error("session closed")]
    SessionClosed,
}

/// A connection was not admitted as a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// `max_connections` sessions are already live.
    #[error("connection limit reached")]
    AtCapacity,
    /// The replay could not be queued.
    #[error("replay delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Connection-time credential check failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthRejected {
    /// Neither a bearer header nor a `token` query parameter was supplied.
    #[error("missing credentials")]
    MissingCredential,
    /// The token failed signature, expiry, or shape checks.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The token is valid but its role is not an administrator role.
    #[error("role not permitted: {0}")]
    InsufficientRole(String),
}

impl IntoResponse for AuthRejected {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_error_wraps_persistence() {
        let err = BroadcastError::from(PersistenceError::Unavailable("disk full".into()));
        assert_eq!(
            err.to_string(),
            "event not persisted: store unavailable: disk full"
        );
    }

    #[test]
    fn aborted_publish_display() {
        let err = BroadcastError::Aborted("task 7 panicked".into());
        assert_eq!(err.to_string(), "publish aborted: task 7 panicked");
    }

    #[test]
    fn admission_error_wraps_delivery() {
        let err = AdmissionError::from(DeliveryError::ChannelClosed);
        assert_eq!(err.to_string(), "replay delivery failed: outbound channel closed");
        assert_eq!(AdmissionError::AtCapacity.to_string(), "connection limit reached");
    }

    #[test]
    fn delivery_error_display() {
        assert_eq!(DeliveryError::QueueFull.to_string(), "outbound queue full");
        assert_eq!(DeliveryError::SessionClosed.to_string(), "session closed");
    }

    #[test]
    fn missing_credential_is_401() {
        let resp = AuthRejected::MissingCredential.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn invalid_token_is_401() {
        let resp = AuthRejected::InvalidToken("ExpiredSignature".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn wrong_role_is_401() {
        let resp = AuthRejected::InsufficientRole("user".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
