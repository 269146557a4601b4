//! Settings type definitions.
//!
//! Every section uses camelCase keys and `#[serde(default)]`, so a settings
//! file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "auth": { "jwtSecret": "..." },
///   "storage": { "dbPath": ":memory:" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanvixSettings {
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Replay and liveness behavior of the feed.
    pub feed: FeedSettings,
    /// Admin credential verification.
    pub auth: AuthSettings,
    /// Event log backend.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Feed client (`planvix-admin tail`).
    pub client: ClientSettings,
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Live sessions allowed before upgrades are refused.
    pub max_connections: usize,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_connections: 64,
            max_message_size: 65_536,
        }
    }
}

/// Feed behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    /// Records replayed to a newly admitted session.
    pub replay_limit: usize,
    /// Cadence at which clients are expected to ping.
    pub keepalive_interval_ms: u64,
    /// Silence after which a session is closed.
    pub liveness_timeout_ms: u64,
    /// Per-session outbound queue depth.
    pub send_queue_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            replay_limit: 20,
            keepalive_interval_ms: 30_000,
            liveness_timeout_ms: 90_000,
            send_queue_capacity: 256,
        }
    }
}

/// Credential gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret for admin tokens. Empty means unconfigured.
    pub jwt_secret: String,
    /// `role` claim values accepted as administrators.
    pub allowed_roles: Vec<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            allowed_roles: vec!["admin".to_string(), "superadmin".to_string()],
        }
    }
}

/// Which event log backend to open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local log, lost on restart.
    Memory,
    /// `SQLite` database at this path.
    Sqlite(std::path::PathBuf),
}

/// Event log storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Database path. `None` uses `~/.planvix/database/activity.db`;
    /// `":memory:"` selects the in-memory log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// Connection pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout.
    pub busy_timeout_ms: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            pool_size: 8,
            busy_timeout_ms: 30_000,
        }
    }
}

impl StorageSettings {
    /// Resolve the configured path into a backend choice.
    pub fn backend(&self) -> StorageBackend {
        match self.db_path.as_deref() {
            Some(":memory:") => StorageBackend::Memory,
            Some(path) => StorageBackend::Sqlite(path.into()),
            None => StorageBackend::Sqlite(
                crate::loader::planvix_dir()
                    .join("database")
                    .join("activity.db"),
            ),
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Feed client timing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Interval between `ping` messages while connected.
    pub keepalive_interval_ms: u64,
    /// First reconnect delay, and the value backoff resets to.
    pub reconnect_floor_ms: u64,
    /// Upper bound on the reconnect delay.
    pub reconnect_ceiling_ms: u64,
    /// Growth factor applied after each failed attempt.
    pub reconnect_factor: f64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            keepalive_interval_ms: 25_000,
            reconnect_floor_ms: 1_000,
            reconnect_ceiling_ms: 30_000,
            reconnect_factor: 2.0,
        }
    }
}
