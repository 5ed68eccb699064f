//! Debug console endpoints (only mounted when `debug.enabled`)
//!
//! - GET /api/debug/auth - Report everything the session layer knows
//! - DELETE /api/debug/auth - Erase persisted auth data

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};

use crate::api::middleware::{ApiError, AppState};
use crate::services::AuthDebugReport;

pub fn router() -> Router<AppState> {
    Router::new().route("/debug/auth", get(check_state).delete(clear_all))
}

async fn check_state(State(state): State<AppState>) -> Result<Json<AuthDebugReport>, ApiError> {
    let console = state
        .debug
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Debug console is disabled"))?;
    Ok(Json(console.check_state()))
}

async fn clear_all(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let console = state
        .debug
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Debug console is disabled"))?;
    console.clear_all();
    Ok(StatusCode::NO_CONTENT)
}
