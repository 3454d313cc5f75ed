//! SSE stream of orchestration events.

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;

/// GET /events
pub async fn event_stream(State(state): State<AppState>) -> impl IntoResponse {
    state.sse.handle_sse_connection()
}
