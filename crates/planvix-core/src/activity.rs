//! Activity kinds, severities, and records.
//!
//! An [`ActivityRecord`] is created exactly once, by the event log, at the
//! moment a product action commits. Producers only ever build a
//! [`NewActivity`]; the sequence number and timestamp are assigned by the
//! store so the log stays totally ordered.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::UnknownKind;

/// Kind-specific scalar attributes (`email`, `user_id`, ...).
pub type Attributes = Map<String, Value>;

/// Actor recorded when a producer does not name one.
pub const SYSTEM_ACTOR: &str = "system";

/// Attribute keys consulted, in order, when generating a default summary.
const SUMMARY_KEYS: [&str; 4] = ["email", "user_id", "strategy_id", "amount"];

/// The closed set of product events the feed records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// A new end user registered.
    UserSignup,
    /// The strategy pipeline produced a document.
    StrategyGenerated,
    /// A user deleted a stored strategy.
    StrategyDeleted,
    /// An administrator signed into the dashboard.
    AdminLogin,
    /// A payment was captured.
    PaymentReceived,
}

impl ActivityKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::UserSignup,
        Self::StrategyGenerated,
        Self::StrategyDeleted,
        Self::AdminLogin,
        Self::PaymentReceived,
    ];

    /// Wire name (`user_signup`, `admin_login`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserSignup => "user_signup",
            Self::StrategyGenerated => "strategy_generated",
            Self::StrategyDeleted => "strategy_deleted",
            Self::AdminLogin => "admin_login",
            Self::PaymentReceived => "payment_received",
        }
    }

    /// Severity used when the producer does not supply one.
    pub fn default_severity(self) -> Severity {
        match self {
            Self::AdminLogin | Self::StrategyDeleted => Severity::Warning,
            Self::PaymentReceived => Severity::Success,
            Self::UserSignup | Self::StrategyGenerated => Severity::Info,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::UserSignup => "New user signup",
            Self::StrategyGenerated => "Strategy generated",
            Self::StrategyDeleted => "Strategy deleted",
            Self::AdminLogin => "Admin login",
            Self::PaymentReceived => "Payment received",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Display severity of an activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine activity.
    #[default]
    Info,
    /// Activity an operator should notice.
    Warning,
    /// Positive business outcome.
    Success,
}

impl Severity {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Success => "success",
        }
    }
}

impl FromStr for Severity {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "success" => Ok(Self::Success),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// An activity as described by its producer, before the log assigns order.
#[derive(Clone, Debug, PartialEq)]
pub struct NewActivity {
    /// What happened.
    pub kind: ActivityKind,
    /// One-line human readable description. May be empty.
    pub summary: String,
    /// Kind-specific scalar attributes.
    pub attributes: Attributes,
    /// Acting principal.
    pub actor: String,
    /// Display severity.
    pub severity: Severity,
}

impl NewActivity {
    /// Describe a new activity with the kind's default severity and the system actor.
    pub fn new(kind: ActivityKind, summary: impl Into<String>) -> Self {
        Self {
            kind,
            summary: summary.into(),
            attributes: Attributes::new(),
            actor: SYSTEM_ACTOR.to_string(),
            severity: kind.default_severity(),
        }
    }

    /// Add one attribute. Non-scalar values (arrays, objects) are dropped.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if is_scalar(&value) {
            let _ = self.attributes.insert(key, value);
        } else {
            debug!(key, "dropping non-scalar activity attribute");
        }
        self
    }

    /// Add every scalar entry of `attributes`.
    #[must_use]
    pub fn with_attributes(self, attributes: Attributes) -> Self {
        attributes
            .into_iter()
            .fold(self, |activity, (key, value)| activity.with_attribute(key, value))
    }

    /// Record the acting principal.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Override the kind's default severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// The summary to store: the producer's text, or one generated from the
    /// kind and its most identifying attribute.
    pub fn resolved_summary(&self) -> String {
        let trimmed = self.summary.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
        let subject = SUMMARY_KEYS
            .iter()
            .find_map(|key| self.attributes.get(*key))
            .map(scalar_text);
        match subject {
            Some(subject) => format!("{}: {subject}", self.kind.label()),
            None => self.kind.label().to_string(),
        }
    }
}

/// One entry of the event log. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Store-assigned, strictly increasing position in the log.
    pub sequence: i64,
    /// What happened.
    pub kind: ActivityKind,
    /// Store-assigned instant, non-decreasing across the log.
    pub timestamp: DateTime<Utc>,
    /// One-line human readable description.
    pub summary: String,
    /// Acting principal.
    pub actor: String,
    /// Display severity.
    pub severity: Severity,
    /// Kind-specific scalar attributes.
    pub attributes: Attributes,
}

impl ActivityRecord {
    /// Materialize a producer's activity at its assigned position.
    pub fn assign(activity: NewActivity, sequence: i64, timestamp: DateTime<Utc>) -> Self {
        let summary = activity.resolved_summary();
        Self {
            sequence,
            kind: activity.kind,
            timestamp,
            summary,
            actor: activity.actor,
            severity: activity.severity,
            attributes: activity.attributes,
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
