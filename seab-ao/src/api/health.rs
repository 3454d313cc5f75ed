//! Health check endpoint.

use crate::state::AppState;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => "connected",
        Err(_) => "unavailable",
    };

    Json(json!({
        "status": "healthy",
        "service": "seab-ao",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "publish_failures": state.bus.publish_failures(),
    }))
}
