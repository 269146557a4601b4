//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup before any metric is recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// A handle that renders without being installed globally (tests, embedding).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Activities persisted and fanned out (counter, labels: kind).
pub const FEED_EVENTS_PUBLISHED_TOTAL: &str = "feed_events_published_total";
/// Publishes aborted by a persistence or encode failure (counter).
pub const FEED_PUBLISH_FAILURES_TOTAL: &str = "feed_publish_failures_total";
/// Live events enqueued to sessions (counter).
pub const FEED_DELIVERIES_TOTAL: &str = "feed_deliveries_total";
/// Live events a session could not accept (counter).
pub const FEED_DELIVERY_FAILURES_TOTAL: &str = "feed_delivery_failures_total";
/// Live sessions (gauge).
pub const FEED_SESSIONS_ACTIVE: &str = "feed_sessions_active";
/// Sessions admitted (counter).
pub const FEED_SESSIONS_OPENED_TOTAL: &str = "feed_sessions_opened_total";
/// Sessions closed (counter, labels: reason).
pub const FEED_SESSIONS_CLOSED_TOTAL: &str = "feed_sessions_closed_total";
