//! Operator surface: file-session visibility and manual cleanup.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

pub fn debug_routes() -> Router<AppState> {
    Router::new()
        .route("/debug/file-sessions", get(file_sessions))
        .route("/debug/cleanup-session/:id", post(cleanup_session))
        .route("/debug/periodic-cleanup", post(periodic_cleanup))
        .route("/debug/retry-finalize/:key", post(retry_finalize))
}

/// GET /debug/file-sessions
async fn file_sessions(State(state): State<AppState>) -> Json<Value> {
    let active = state.file_sessions.get_active_sessions().await;
    Json(json!({
        "status": "success",
        "total_active": active.len(),
        "active_sessions": active,
    }))
}

/// POST /debug/cleanup-session/{id}
async fn cleanup_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if state.file_sessions.get_session_info(&session_id).await.is_none() {
        return Err(ApiError::NotFound(format!("Session {session_id} not found")));
    }

    let cleaned = state.file_sessions.force_cleanup(&session_id).await;
    Ok(Json(json!({
        "status": "success",
        "cleaned": cleaned,
        "message": format!("Forced cleanup of session {session_id}"),
    })))
}

/// POST /debug/periodic-cleanup
async fn periodic_cleanup(State(state): State<AppState>) -> Json<Value> {
    crate::tasks::run_sweep(&state).await;
    Json(json!({
        "status": "success",
        "message": "Periodic cleanup completed",
    }))
}

/// POST /debug/retry-finalize/{key}
///
/// Re-runs the finalize step for a submission whose persistence failed.
async fn retry_finalize(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.results.has(&key).await {
        return Err(ApiError::NotFound(format!(
            "No results found for submission: {key}"
        )));
    }

    let retried = state.aggregator.retry_finalize(&key).await;
    Ok(Json(json!({
        "status": "success",
        "retried": retried,
    })))
}
