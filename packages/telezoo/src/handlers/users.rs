use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use super::StatusState;
use crate::models::{ChannelId, User};

/// Stored record of one user: mode, pinned pod, session and status
pub async fn get_user_handler(
    State(state): State<StatusState>,
    Path(id): Path<i64>,
) -> Result<Json<User>, StatusCode> {
    match state.store.get(ChannelId(id)) {
        Some(user) => Ok(Json(user)),
        None => Err(StatusCode::NOT_FOUND),
    }
}
