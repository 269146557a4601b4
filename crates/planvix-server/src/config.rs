//! Server configuration.

use std::time::Duration;

use planvix_settings::PlanvixSettings;

/// Runtime configuration for [`FeedServer`](crate::FeedServer).
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Live sessions allowed before upgrades get 503.
    pub max_connections: usize,
    /// Largest inbound WebSocket message in bytes.
    pub max_message_size: usize,
    /// Records replayed to a newly admitted session.
    pub replay_limit: usize,
    /// Liveness check cadence.
    pub keepalive_interval: Duration,
    /// Silence after which a session is closed.
    pub liveness_timeout: Duration,
    /// Per-session outbound queue depth.
    pub send_queue_capacity: usize,
    /// How long shutdown waits for connections to drain.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 64,
            max_message_size: 64 * 1024,
            replay_limit: 20,
            keepalive_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(90),
            send_queue_capacity: 256,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &PlanvixSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            replay_limit: settings.feed.replay_limit,
            keepalive_interval: Duration::from_millis(settings.feed.keepalive_interval_ms),
            liveness_timeout: Duration::from_millis(settings.feed.liveness_timeout_ms),
            send_queue_capacity: settings.feed.send_queue_capacity,
            ..Self::default()
        }
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_auto_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }

    #[test]
    fn default_feed_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.replay_limit, 20);
        assert_eq!(cfg.liveness_timeout, Duration::from_secs(90));
        assert!(cfg.send_queue_capacity > cfg.replay_limit);
    }

    #[test]
    fn from_settings_maps_fields() {
        let mut settings = PlanvixSettings::default();
        settings.server.port = 9100;
        settings.feed.replay_limit = 10;
        settings.feed.keepalive_interval_ms = 5_000;
        settings.feed.liveness_timeout_ms = 15_000;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9100");
        assert_eq!(cfg.replay_limit, 10);
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(5));
        assert_eq!(cfg.liveness_timeout, Duration::from_secs(15));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(30));
    }
}
