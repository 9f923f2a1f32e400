//! Outbox administration endpoints (§4.10, §A — supplemented feature).
//!
//! Not auth-gated: authentication/authorization is explicitly out of
//! scope for this subsystem (§1 Non-goals), so these are reachable by
//! anyone who can reach the API, the same as every other route here.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::handlers::ApiResult;
use crate::AppState;

fn default_retry_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    #[serde(default = "default_retry_limit")]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub retried: usize,
}

/// `POST /admin/outbox/retry`: flips up to `limit` `failed` rows back to
/// `pending` and republishes them immediately (§4.2).
#[instrument(skip(state))]
pub async fn retry_outbox(State(state): State<AppState>, Json(body): Json<RetryRequest>) -> ApiResult<Json<RetryResponse>> {
    let retried = state.relay.retry_failed(body.limit).await.map_err(|e| crate::handlers::ApiError::Internal {
        message: e.to_string(),
    })?;
    Ok(Json(RetryResponse { retried }))
}

fn default_retention_hours() -> i64 {
    168
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_retention_hours")]
    pub older_than_hours: i64,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

/// `POST /admin/outbox/cleanup`: deletes `published` rows older than
/// `older_than_hours` (default 168h / 7 days). Never deletes `failed`
/// rows (testable property 10).
#[instrument(skip(state))]
pub async fn cleanup_outbox(State(state): State<AppState>, Json(body): Json<CleanupRequest>) -> ApiResult<Json<CleanupResponse>> {
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(body.older_than_hours);
    let deleted = state.relay.cleanup(cutoff).await.map_err(|e| crate::handlers::ApiError::Internal {
        message: e.to_string(),
    })?;
    Ok(Json(CleanupResponse { deleted }))
}
