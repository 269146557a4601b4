//! JSON framing for the activity feed.
//!
//! Server → client: one JSON object per event, for both the replay batch and
//! live pushes, shaped
//! `{type, timestamp, time, details, severity, admin, sequence, ...attributes}`,
//! plus `{"type": "pong"}` in answer to a keepalive.
//!
//! Client → server: the literal text [`PING`].

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::activity::{ActivityKind, ActivityRecord};
use crate::errors::MalformedMessage;

/// Keepalive message sent by clients.
pub const PING: &str = "ping";

/// Message `type` of the keepalive acknowledgement.
pub const PONG_TYPE: &str = "pong";

/// Keys owned by the envelope. Attributes never override them.
const RESERVED_KEYS: [&str; 7] = [
    "type", "timestamp", "time", "details", "severity", "admin", "sequence",
];

/// Serialized keepalive acknowledgement.
pub fn pong_message() -> String {
    json!({ "type": PONG_TYPE }).to_string()
}

/// Build the wire object for a stored record.
pub fn encode_event(record: &ActivityRecord) -> Value {
    let mut object = Map::with_capacity(record.attributes.len() + RESERVED_KEYS.len());
    for (key, value) in &record.attributes {
        if !RESERVED_KEYS.contains(&key.as_str()) {
            let _ = object.insert(key.clone(), value.clone());
        }
    }
    let _ = object.insert("type".into(), json!(record.kind.as_str()));
    let _ = object.insert(
        "timestamp".into(),
        json!(record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    let _ = object.insert(
        "time".into(),
        json!(record.timestamp.format("%H:%M:%S").to_string()),
    );
    let _ = object.insert("details".into(), json!(record.summary));
    let _ = object.insert("severity".into(), json!(record.severity.as_str()));
    let _ = object.insert("admin".into(), json!(record.actor));
    let _ = object.insert("sequence".into(), json!(record.sequence));
    Value::Object(object)
}

/// An event as seen by a feed consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    /// Activity kind wire name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// RFC 3339 creation instant.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// `HH:MM:SS` rendering of the timestamp.
    #[serde(default)]
    pub time: Option<String>,
    /// Human readable summary.
    #[serde(default)]
    pub details: Option<String>,
    /// Display severity.
    #[serde(default)]
    pub severity: Option<String>,
    /// Acting principal.
    #[serde(default)]
    pub admin: Option<String>,
    /// Position in the server's event log.
    #[serde(default)]
    pub sequence: Option<i64>,
    /// Kind-specific attributes.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl FeedEvent {
    /// Parsed kind, if the server sent one this build knows.
    pub fn kind(&self) -> Option<ActivityKind> {
        self.event_type.parse().ok()
    }
}

/// A decoded server → client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Keepalive acknowledgement.
    Pong,
    /// Replayed or live event.
    Event(FeedEvent),
}

/// Decode one server frame.
pub fn decode_inbound(text: &str) -> Result<Inbound, MalformedMessage> {
    let value: Value = serde_json::from_str(text)?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(MalformedMessage::MissingType);
    };
    if kind == PONG_TYPE {
        return Ok(Inbound::Pong);
    }
    Ok(Inbound::Event(serde_json::from_value(value)?))
}
