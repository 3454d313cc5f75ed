//! Results read surface.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};

pub fn results_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/results/submission/:key",
            get(get_transformed).delete(clear_submission),
        )
        .route("/results/submission/:key/raw", get(get_raw))
        .route("/results/submissions", get(list_submissions))
}

/// GET /results/submission/{key}
///
/// Canonicalized question results in ascending question order.
async fn get_transformed(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    let results = state
        .results
        .get_transformed(&key)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No results found for submission: {key}")))?;

    Ok(Json(json!({
        "submission_url": key,
        "results": results,
        "count": results.len(),
    })))
}

/// GET /results/submission/{key}/raw
async fn get_raw(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    let aggregate = state
        .results
        .get_raw(&key)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No results found for submission: {key}")))?;

    Ok(Json(serde_json::to_value(aggregate).map_err(|e| {
        ApiError::Internal(format!("cannot serialize aggregate: {e}"))
    })?))
}

/// GET /results/submissions
async fn list_submissions(State(state): State<AppState>) -> Json<Value> {
    let submissions = state.results.list_all().await;
    Json(json!({
        "count": submissions.len(),
        "submissions": submissions,
    }))
}

/// DELETE /results/submission/{key}
async fn clear_submission(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.results.clear(&key).await {
        return Err(ApiError::NotFound(format!(
            "No results found for submission: {key}"
        )));
    }
    Ok(Json(json!({
        "message": format!("Results cleared for submission: {key}")
    })))
}
