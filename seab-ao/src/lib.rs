//! seab-ao - Analysis Orchestrator Microservice
//!
//! Event-driven coordination engine for the spoken-English assessment
//! backend. For each student submission it fans one entry event out into
//! per-question audio-conversion and transcription work, pairs their
//! completions, runs the five analysis stages with the pronunciation
//! gate on fluency, and aggregates per-question results into one final
//! persisted payload. All progress is driven by broker push deliveries;
//! the service tolerates duplicates and arbitrary ordering.

pub mod aggregator;
pub mod api;
pub mod bus;
pub mod coordinator;
pub mod error;
pub mod feedback;
pub mod file_sessions;
pub mod intake;
pub mod lexicon;
pub mod orchestrator;
pub mod results_store;
pub mod services;
pub mod sse;
pub mod state;
pub mod tasks;

pub use state::{AppState, Collaborators};

use axum::routing::get;
use axum::Router;

/// Build the application router.
///
/// Routes:
/// - POST /submit - admit a submission
/// - POST /webhooks/* - one route per logical event (push or direct)
/// - GET /results/* - transformed and raw aggregates
/// - GET /debug/file-sessions, POST /debug/* - operator surface
/// - GET /events - SSE stream of orchestration events
/// - GET /health - health check
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::webhook_routes())
        .merge(api::submit_routes())
        .merge(api::results_routes())
        .merge(api::debug_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
