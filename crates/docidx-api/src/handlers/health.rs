//! Liveness, readiness, and component health (§6).

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::json;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// `GET /healthz`: process is up and serving. Never checks dependencies.
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /readyz`: the database is reachable. A degraded dependency
/// (e.g. the embedding provider) does not fail readiness on its own —
/// hybrid search degrades to keyword-only rather than the service being
/// pulled from rotation (§7).
pub async fn readiness(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();

    Json(json!({
        "status": if database { "ready" } else { "not_ready" },
        "components": { "database": database },
    }))
}
