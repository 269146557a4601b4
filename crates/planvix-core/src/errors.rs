//! Error types shared by the feed server and client.

use thiserror::Error;

/// A stored or received name that is not part of a closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown variant: {0}")]
pub struct UnknownKind(pub String);

/// An inbound feed frame that could not be understood.
///
/// Always discarded by the receiver; never closes the connection.
#[derive(Debug, Error)]
pub enum MalformedMessage {
    /// Frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Frame is JSON but not an object with a string `type`.
    #[error("missing message type")]
    MissingType,
}
