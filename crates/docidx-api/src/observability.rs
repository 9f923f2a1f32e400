//! Request tracing and metrics for the search API.
//!
//! Structured logs carry a request/correlation id end to end; `Metrics`
//! backs the environment-level observables §6 lists for request rate,
//! error rate, and latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{header::HeaderValue, HeaderName, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub correlation_id: String,
    pub started_at: chrono::DateTime<Utc>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(generate_request_id);

        let correlation_id = headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| request_id.clone());

        Self {
            request_id,
            correlation_id,
            started_at: Utc::now(),
        }
    }
}

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let random: u32 = rand::random();
    format!("req_{timestamp:x}{random:08x}")
}

/// Request-rate/error-rate/latency counters (§6 "Environment-level
/// observables").
#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_client_error: AtomicU64,
    pub requests_server_error: AtomicU64,
    pub request_latency_us_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, status: StatusCode, latency_us: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.request_latency_us_total.fetch_add(latency_us, Ordering::Relaxed);

        if status.is_success() {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else if status.is_client_error() {
            self.requests_client_error.fetch_add(1, Ordering::Relaxed);
        } else if status.is_server_error() {
            self.requests_server_error.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.requests_total.load(Ordering::Relaxed);
        let latency_total = self.request_latency_us_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: total,
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_client_error: self.requests_client_error.load(Ordering::Relaxed),
            requests_server_error: self.requests_server_error.load(Ordering::Relaxed),
            avg_latency_ms: if total > 0 { (latency_total / total) as f64 / 1000.0 } else { 0.0 },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_client_error: u64,
    pub requests_server_error: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub http: MetricsSnapshot,
}

/// Request-tracing middleware: assigns/propagates a request id, wraps
/// the handler in a span carrying it, and logs completion with status
/// and latency.
pub async fn request_context_middleware(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let ctx = RequestContext::from_headers(request.headers());

    let span = info_span!(
        "http_request",
        request_id = %ctx.request_id,
        correlation_id = %ctx.correlation_id,
        method = %request.method(),
        uri = %request.uri(),
    );

    request.extensions_mut().insert(ctx.clone());

    let response = next.run(request).instrument(span.clone()).await;

    let latency = start.elapsed();
    let status = response.status();
    span.in_scope(|| {
        info!(status = %status.as_u16(), latency_ms = %latency.as_millis(), "request completed");
    });

    let mut response = response;
    if let Ok(header_value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(HeaderName::from_static(REQUEST_ID_HEADER), header_value);
    }
    response
}

pub async fn metrics_middleware(State(state): State<crate::AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state.metrics.record_request(response.status(), start.elapsed().as_micros() as u64);
    response
}

pub async fn metrics_handler(State(state): State<crate::AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        service: "docidx-api",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339(),
        http: state.metrics.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn request_id_generation_has_prefix() {
        let id = generate_request_id();
        assert!(id.starts_with("req_"));
    }

    #[test]
    fn context_from_empty_headers_derives_correlation_from_request_id() {
        let headers = HeaderMap::new();
        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.request_id, ctx.correlation_id);
    }

    #[test]
    fn context_respects_explicit_correlation_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, "req-123".parse().unwrap());
        headers.insert(CORRELATION_ID_HEADER, "corr-456".parse().unwrap());
        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.request_id, "req-123");
        assert_eq!(ctx.correlation_id, "corr-456");
    }

    #[test]
    fn metrics_classify_status_codes() {
        let metrics = Metrics::new();
        metrics.record_request(StatusCode::OK, 1000);
        metrics.record_request(StatusCode::NOT_FOUND, 500);
        metrics.record_request(StatusCode::INTERNAL_SERVER_ERROR, 3000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 3);
        assert_eq!(snapshot.requests_success, 1);
        assert_eq!(snapshot.requests_client_error, 1);
        assert_eq!(snapshot.requests_server_error, 1);
    }
}
