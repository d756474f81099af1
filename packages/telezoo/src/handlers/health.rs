use axum::{Json, extract::State, response::IntoResponse};

use super::StatusState;
use crate::metrics;

/// Health check endpoint - returns relay status
pub async fn health_handler(State(state): State<StatusState>) -> impl IntoResponse {
    let metrics = state.metrics.snapshot();

    // More jobs failing than succeeding usually means the pods are down
    let status = if metrics.jobs.abandoned > metrics.jobs.finished {
        "degraded"
    } else {
        "healthy"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        users: metrics::UserHealth {
            known: state.store.len() as u64,
            processing: state.store.processing_count() as u64,
        },
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed relay metrics
pub async fn metrics_handler(State(state): State<StatusState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness check - returns 200 if the process is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
