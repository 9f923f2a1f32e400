//! API error types (§A.11, §7 "User-visible behavior for search").

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use docidx_adapters::SearchEngineError;
use docidx_ports::{OutboxStoreError, SearchIndexError, VectorStoreError};
use serde::Serialize;

/// API result type alias.
pub type ApiResult<T> = Result<T, ApiError>;

/// The small closed set of HTTP-visible error shapes. Deliberately does
/// not grow one variant per domain error type — adapters' errors fold
/// into this set via the `From` impls below.
#[derive(Debug)]
pub enum ApiError {
    NotFound { resource: String, id: String },
    BadRequest { message: String },
    Conflict { message: String },
    /// A typed, user-visible degradation rather than an outright 500:
    /// e.g. semantic search requested with no embedding provider
    /// configured (§7).
    ServiceDegraded { message: String },
    Internal { message: String },
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            ApiError::NotFound { resource, id } => (
                StatusCode::NOT_FOUND,
                format!("{resource} not found: {id}"),
                None,
            ),
            ApiError::BadRequest { message } => (StatusCode::BAD_REQUEST, message.clone(), None),
            ApiError::Conflict { message } => (StatusCode::CONFLICT, message.clone(), None),
            ApiError::ServiceDegraded { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                message.clone(),
                Some(serde_json::json!({ "error_code": "SERVICE_DEGRADED" })),
            ),
            ApiError::Internal { message } => {
                tracing::error!(error = %message, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string(), None)
            }
        };

        let body = ErrorResponse {
            error,
            code: status.as_u16(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<SearchEngineError> for ApiError {
    fn from(e: SearchEngineError) -> Self {
        match e {
            SearchEngineError::SemanticSearchUnavailable => ApiError::ServiceDegraded {
                message: "semantic search not available: no embedding provider configured".to_string(),
            },
            SearchEngineError::Provider(err) => ApiError::ServiceDegraded {
                message: format!("embedding provider error: {err}"),
            },
            SearchEngineError::Index(err) => err.into(),
            SearchEngineError::Vector(err) => err.into(),
        }
    }
}

impl From<SearchIndexError> for ApiError {
    fn from(e: SearchIndexError) -> Self {
        match e {
            SearchIndexError::QueryParseError { message } => ApiError::BadRequest { message },
            SearchIndexError::IndexError { message } => ApiError::Internal { message },
        }
    }
}

impl From<VectorStoreError> for ApiError {
    fn from(e: VectorStoreError) -> Self {
        match e {
            VectorStoreError::DimensionMismatch { expected, actual } => ApiError::BadRequest {
                message: format!("dimension mismatch: expected {expected}, got {actual}"),
            },
            VectorStoreError::ConnectionError { message } => ApiError::Internal { message },
        }
    }
}

impl From<OutboxStoreError> for ApiError {
    fn from(e: OutboxStoreError) -> Self {
        match e {
            OutboxStoreError::NotFound { id } => ApiError::NotFound {
                resource: "OutboxEntry".to_string(),
                id: id.to_string(),
            },
            OutboxStoreError::Duplicate => ApiError::Conflict {
                message: "duplicate idempotent key".to_string(),
            },
            OutboxStoreError::ConnectionError { message } => ApiError::Internal { message },
        }
    }
}
