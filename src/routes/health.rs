use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .route("/database", get(database_health))
}

pub async fn health_check(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "uptimeSecs": state.uptime_secs(),
        "store": {
            "healthy": probe_store(&state).is_ok(),
        }
    }))
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Ready once the store answers reads.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match probe_store(&state) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness probe failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub async fn database_health(
    State(state): State<AppState>,
) -> impl axum::response::IntoResponse {
    let start = Instant::now();
    let healthy = probe_store(&state).is_ok();
    let latency_us = start.elapsed().as_micros() as u64;

    Json(serde_json::json!({
        "healthy": healthy,
        "latencyUs": latency_us,
        "users": state.store().count_users(),
        "snapshots": state.store().count_wrapped_snapshots(),
        "events": state.store().count_usage_events(),
    }))
}

fn probe_store(state: &AppState) -> Result<(), crate::store::StoreError> {
    state.store().get_user_by_id("__health_check__").map(|_| ())
}
