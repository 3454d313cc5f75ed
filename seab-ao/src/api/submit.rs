//! Public submission intake.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{extract::State, response::Json, routing::post, Router};
use seab_common::events::{StudentSubmission, Topic};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub audio_urls: Vec<String>,
    pub submission_url: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: String,
    pub message: String,
    pub submission_url: String,
    pub total_questions: u32,
}

pub fn submit_routes() -> Router<AppState> {
    Router::new().route("/submit", post(submit))
}

/// POST /submit
///
/// Admits a submission and synchronously publishes its entry event. The
/// actual processing is driven by the broker pushing that event back.
async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<Json<SubmitResponse>> {
    if request.audio_urls.is_empty() {
        return Err(ApiError::BadRequest("No audio URLs provided".into()));
    }
    if request.submission_url.trim().is_empty() {
        return Err(ApiError::BadRequest("No submission URL provided".into()));
    }

    let total_questions = request.audio_urls.len() as u32;
    let event = StudentSubmission {
        audio_urls: request.audio_urls,
        submission_url: request.submission_url.clone(),
        total_questions,
    };

    state.bus.publish(Topic::StudentSubmission, &event).await;

    tracing::info!(
        submission = %request.submission_url,
        total_questions,
        "Submission admitted"
    );

    Ok(Json(SubmitResponse {
        status: "processing".into(),
        message: format!("Analysis started for {total_questions} audio files"),
        submission_url: request.submission_url,
        total_questions,
    }))
}
