//! REST fallbacks for dashboards that poll instead of subscribing.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use planvix_core::encode_event;
use planvix_events::{EventLog, PersistenceError};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use crate::auth::Credentials;
use crate::errors::AuthRejected;
use crate::server::AppState;

/// `limit` when `/api/admin/logs` is called without one.
pub const DEFAULT_LOG_LIMIT: i64 = 100;
/// Largest accepted `limit`.
pub const MAX_LOG_LIMIT: i64 = 500;
/// Entries returned by `/api/admin/activity`.
pub const ACTIVITY_LIMIT: usize = 50;

/// Query string of the REST endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    /// Number of entries for `/api/admin/logs`.
    pub limit: Option<i64>,
    /// Admin token, as an alternative to the `Authorization` header.
    pub token: Option<String>,
}

/// Failure of a REST request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credential check failed.
    #[error(transparent)]
    Unauthorized(#[from] AuthRejected),
    /// Request parameters out of range.
    #[error("{0}")]
    BadRequest(String),
    /// The event log could not be read.
    #[error("event log unavailable")]
    Store(#[from] PersistenceError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized(rejected) => return rejected.clone().into_response(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Store(error) => {
                warn!(%error, "REST read failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

/// `GET /api/admin/logs?limit=N`: newest `N` records, newest first.
pub async fn list_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Value>, ApiError> {
    let _ = state
        .sessions
        .authorize(&Credentials::from_request(&headers, query.token))?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {MAX_LOG_LIMIT}"
        )));
    }
    let limit = usize::try_from(limit).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let logs = newest_first(state.log.as_ref(), limit).await?;
    Ok(Json(json!({ "logs": logs })))
}

/// `GET /api/admin/activity`: the newest [`ACTIVITY_LIMIT`] records, newest first.
pub async fn recent_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Value>, ApiError> {
    let _ = state
        .sessions
        .authorize(&Credentials::from_request(&headers, query.token))?;
    let activities = newest_first(state.log.as_ref(), ACTIVITY_LIMIT).await?;
    Ok(Json(json!({ "activities": activities })))
}

async fn newest_first(log: &dyn EventLog, limit: usize) -> Result<Vec<Value>, PersistenceError> {
    let records = log.recent(limit).await?;
    Ok(records.iter().rev().map(encode_event).collect())
}
