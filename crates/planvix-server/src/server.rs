//! `FeedServer`: axum HTTP + WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use planvix_events::EventLog;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::{self, FeedQuery};
use crate::auth::{CredentialVerifier, Credentials};
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::ActivityBroadcaster;
use crate::websocket::connection::run_subscriber;
use crate::websocket::manager::SessionManager;
use crate::websocket::session::CloseReason;

/// WebSocket route of the live feed.
pub const FEED_PATH: &str = "/ws/admin/activity";

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live session set and credential gate.
    pub sessions: Arc<SessionManager>,
    /// Event log for REST reads and health.
    pub log: Arc<dyn EventLog>,
    /// Cancelled on shutdown.
    pub shutdown: CancellationToken,
    /// Prometheus renderer.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Liveness check cadence per connection.
    pub keepalive_interval: Duration,
    /// Largest inbound WebSocket message.
    pub max_message_size: usize,
}

/// The activity feed server.
pub struct FeedServer {
    config: ServerConfig,
    log: Arc<dyn EventLog>,
    sessions: Arc<SessionManager>,
    broadcaster: Arc<ActivityBroadcaster>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl FeedServer {
    /// Wire the broadcaster and session manager over `log`.
    pub fn new(
        config: ServerConfig,
        log: Arc<dyn EventLog>,
        verifier: Arc<dyn CredentialVerifier>,
        metrics: PrometheusHandle,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(Arc::clone(&log), verifier, &config));
        let broadcaster = Arc::new(ActivityBroadcaster::new(
            Arc::clone(&log),
            Arc::clone(&sessions),
        ));
        Self {
            config,
            log,
            sessions,
            broadcaster,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: Arc::clone(&self.sessions),
            log: Arc::clone(&self.log),
            shutdown: self.shutdown.token(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            keepalive_interval: self.config.keepalive_interval,
            max_message_size: self.config.max_message_size,
        };
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(FEED_PATH, get(feed_handler))
            .route("/api/admin/logs", get(api::list_logs))
            .route("/api/admin/activity", get(api::recent_activity))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in the background. Returns the bound address and the
    /// serve task, which ends once shutdown is initiated.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();
        info!(%addr, "feed server listening");

        let handle = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(%error, "feed server terminated");
            }
        });
        Ok((addr, handle))
    }

    /// Stop accepting, close every session, and wait for `handles` within
    /// the configured shutdown timeout. Returns `false` on timeout.
    pub async fn stop(&self, handles: Vec<JoinHandle<()>>) -> bool {
        let drained = self
            .shutdown
            .graceful_shutdown(handles, self.config.shutdown_timeout)
            .await;
        let stragglers = self.sessions.close_all(CloseReason::ServerShutdown).await;
        info!(drained, stragglers, "feed server stopped");
        drained
    }

    /// The broadcaster producers publish through.
    pub fn broadcaster(&self) -> &Arc<ActivityBroadcaster> {
        &self.broadcaster
    }

    /// The session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let total_events = state.log.count().await.ok();
    Json(health::health_check(
        state.start_time,
        state.sessions.count(),
        total_events,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// GET /ws/admin/activity
///
/// Credentials are checked before the upgrade so a rejected caller gets a
/// plain 401 and no session is ever created.
async fn feed_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let credentials = Credentials::from_request(&headers, query.token);
    let identity = match state.sessions.authorize(&credentials) {
        Ok(identity) => identity,
        Err(rejected) => {
            info!(%rejected, "feed connection refused");
            return rejected.into_response();
        }
    };
    let slot = match state.sessions.try_reserve() {
        Some(slot) if !state.shutdown.is_cancelled() => slot,
        _ => {
            warn!(live = state.sessions.count(), "feed unavailable, refusing connection");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "detail": "activity feed unavailable" })),
            )
                .into_response();
        }
    };
    // A rejected or failed upgrade drops `slot` and frees the place.
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let sessions = Arc::clone(&state.sessions);
    let keepalive = state.keepalive_interval;
    let shutdown = state.shutdown.clone();
    upgrade
        .max_message_size(state.max_message_size)
        .on_upgrade(move |ws| run_subscriber(ws, slot, identity, sessions, keepalive, shutdown))
}
