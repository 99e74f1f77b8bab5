//! Liveness and readiness checks.
//!
//! Both respond with plain text so they can be consumed by orchestration
//! tooling without JSON parsing.
use crate::app::AppState;
use axum::extract::State;
use axum::http::StatusCode;

pub(crate) async fn healthy() -> (StatusCode, &'static str) {
    (StatusCode::OK, "Healthy")
}

/// 200 `Ready` once every bootstrap stage is done; otherwise 503 naming the
/// outstanding stages.
pub(crate) async fn ready(State(state): State<AppState>) -> (StatusCode, String) {
    let status = state.readiness.snapshot_status();
    let code = if status.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, status.to_string())
}
