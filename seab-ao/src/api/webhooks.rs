//! Webhook surface: one route per logical event.
//!
//! Every route accepts both invocation shapes (direct payload and push
//! envelope). Handled business failures return 200 so the broker does not
//! redeliver; 4xx is reserved for malformed envelopes and 5xx for messages
//! the service has not durably processed.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    response::Json,
    routing::post,
    Router,
};
use seab_common::envelope::{self, Inbound};
use seab_common::events::{
    AnalysisComplete, AudioConversionDone, QuestionAnalysisReady, Stage, StageDone,
    StudentSubmission, SubmissionAnalysisComplete, Topic, TranscriptionDone,
};
use serde_json::{json, Value};
use tracing::info;

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route(
            Topic::StudentSubmission.webhook_path(),
            post(student_submission),
        )
        .route(
            Topic::AudioConversionDone.webhook_path(),
            post(audio_conversion_done),
        )
        .route(
            Topic::TranscriptionDone.webhook_path(),
            post(transcription_done),
        )
        .route(
            Topic::QuestionAnalysisReady.webhook_path(),
            post(question_analysis_ready),
        )
        .route(Topic::PronunciationDone.webhook_path(), post(pronunciation_done))
        .route(Topic::GrammarDone.webhook_path(), post(grammar_done))
        .route(Topic::LexicalDone.webhook_path(), post(lexical_done))
        .route(Topic::VocabularyDone.webhook_path(), post(vocabulary_done))
        .route(Topic::FluencyDone.webhook_path(), post(fluency_done))
        .route(
            Topic::AnalysisComplete.webhook_path(),
            post(analysis_complete),
        )
        .route(
            Topic::SubmissionAnalysisComplete.webhook_path(),
            post(submission_analysis_complete),
        )
}

fn decode_body(body: &Bytes) -> Result<Inbound, crate::error::ApiError> {
    let inbound = envelope::decode(body)?;
    if let Some(message_id) = inbound.message_id() {
        info!(message_id = %message_id, "Push delivery received");
    }
    Ok(inbound)
}

fn ack(message: &str) -> Json<Value> {
    Json(json!({"status": "success", "message": message}))
}

/// Entry event: fan out audio and transcription work for every recording.
async fn student_submission(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let inbound = decode_body(&body)?;
    let submission = StudentSubmission::from_payload(inbound.payload())?;

    state.intake.process_submission(submission).await;
    Ok(ack("Submission processing completed"))
}

async fn audio_conversion_done(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let inbound = decode_body(&body)?;
    let message = AudioConversionDone::from_payload(inbound.payload())?;

    state.coordinator.on_audio_ready(message).await;
    Ok(ack("Audio conversion done processed"))
}

async fn transcription_done(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let inbound = decode_body(&body)?;
    let message = TranscriptionDone::from_payload(inbound.payload())?;

    state.coordinator.on_transcript_ready(message).await;
    Ok(ack("Transcription done processed"))
}

async fn question_analysis_ready(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let inbound = decode_body(&body)?;
    let ready = QuestionAnalysisReady::from_payload(inbound.payload())?;

    state.orchestrator.on_analysis_ready(ready).await;
    Ok(ack("Question analysis started"))
}

async fn analysis_complete(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let inbound = decode_body(&body)?;
    let event = AnalysisComplete::from_payload(inbound.payload())?;

    state.aggregator.on_analysis_complete(event).await;
    Ok(ack("Analysis completion processed"))
}

/// Terminal event; nothing left to drive, acknowledged for observability.
async fn submission_analysis_complete(body: Bytes) -> ApiResult<Json<Value>> {
    let inbound = decode_body(&body)?;
    let event = SubmissionAnalysisComplete::from_payload(inbound.payload())?;

    info!(
        submission = %event.submission_url,
        total_questions = event.total_questions,
        "Submission analysis complete acknowledged"
    );
    Ok(ack("Submission analysis completion acknowledged"))
}

async fn stage_done(stage: Stage, body: Bytes) -> ApiResult<Json<Value>> {
    let inbound = decode_body(&body)?;
    let event = StageDone::from_payload(inbound.payload())?;

    info!(
        submission = %event.submission_url,
        question = event.question_number,
        stage = %stage,
        errored = event.result.is_error(),
        "Stage completion acknowledged"
    );
    Ok(ack("Stage completion acknowledged"))
}

async fn pronunciation_done(body: Bytes) -> ApiResult<Json<Value>> {
    stage_done(Stage::Pronunciation, body).await
}

async fn grammar_done(body: Bytes) -> ApiResult<Json<Value>> {
    stage_done(Stage::Grammar, body).await
}

async fn lexical_done(body: Bytes) -> ApiResult<Json<Value>> {
    stage_done(Stage::Lexical, body).await
}

async fn vocabulary_done(body: Bytes) -> ApiResult<Json<Value>> {
    stage_done(Stage::Vocabulary, body).await
}

async fn fluency_done(body: Bytes) -> ApiResult<Json<Value>> {
    stage_done(Stage::Fluency, body).await
}
