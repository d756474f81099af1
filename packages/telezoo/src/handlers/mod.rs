pub mod health;
pub mod users;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::metrics::RelayMetrics;
use crate::registry::SessionStore;

pub use health::{health_handler, health_live_handler, metrics_handler};
pub use users::get_user_handler;

/// Read-only view of the relay served by the status server.
#[derive(Clone)]
pub struct StatusState {
    pub store: Arc<SessionStore>,
    pub metrics: Arc<RelayMetrics>,
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(health_live_handler))
        .route("/metrics", get(metrics_handler))
        .route("/users/{id}", get(get_user_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
