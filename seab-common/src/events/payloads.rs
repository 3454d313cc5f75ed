//! Typed payloads for the event topics.
//!
//! Each inbound payload has a `from_payload` constructor that checks the
//! event's required fields first (so a bad message is rejected with the
//! field name) and only then deserializes. Outbound payloads are plain
//! serde serialization of the same types.

use crate::envelope::{require_str, require_u64, EnvelopeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_total_questions() -> u32 {
    1
}

/// One word of speech-to-text or pronunciation detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordDetail {
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// A successful analysis sub-result: grade on a 0-100 scale, a list of
/// issues, and component-specific detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub grade: f64,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

/// A sub-result is either a success shape or an error shape. Missing
/// sub-results are coerced to the error shape before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    Success(AnalysisReport),
    Error { error: String },
}

impl AnalysisOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        AnalysisOutcome::Error {
            error: message.into(),
        }
    }

    /// The coercion applied when a stage never produced a result.
    pub fn missing() -> Self {
        AnalysisOutcome::error("missing")
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AnalysisOutcome::Error { .. })
    }
}

/// Per-question speaking-time feedback, or an error shape when the
/// assignment carries no time limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationFeedback {
    Message(String),
    Error { error: String },
}

/// The consolidated result for one question of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub submission_url: String,
    pub question_number: u32,
    pub pronunciation: AnalysisOutcome,
    pub grammar: AnalysisOutcome,
    pub lexical: AnalysisOutcome,
    pub vocabulary: AnalysisOutcome,
    pub fluency: AnalysisOutcome,
    pub transcript: String,
    pub audio_duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_feedback: Option<DurationFeedback>,
}

impl QuestionResult {
    /// Sub-results in schema order, independent of completion order.
    pub fn outcomes(&self) -> [(&'static str, &AnalysisOutcome); 5] {
        [
            ("pronunciation", &self.pronunciation),
            ("grammar", &self.grammar),
            ("lexical", &self.lexical),
            ("vocabulary", &self.vocabulary),
            ("fluency", &self.fluency),
        ]
    }
}

/// STUDENT_SUBMISSION: one submission with its recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSubmission {
    pub audio_urls: Vec<String>,
    pub submission_url: String,
    pub total_questions: u32,
}

impl StudentSubmission {
    pub fn from_payload(payload: &Value) -> Result<Self, EnvelopeError> {
        if !payload
            .get("audio_urls")
            .map(Value::is_array)
            .unwrap_or(false)
        {
            return Err(EnvelopeError::MissingField("audio_urls"));
        }
        require_str(payload, "submission_url")?;
        require_u64(payload, "total_questions")?;
        serde_json::from_value(payload.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }
}

/// AUDIO_CONVERSION_DONE: one recording transcoded to WAV, or a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConversionDone {
    pub submission_url: String,
    pub question_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,
    #[serde(default = "default_total_questions")]
    pub total_questions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AudioConversionDone {
    pub fn from_payload(payload: &Value) -> Result<Self, EnvelopeError> {
        require_str(payload, "submission_url")?;
        require_u64(payload, "question_number")?;
        // The data fields are only required when the conversion succeeded.
        if payload.get("error").and_then(Value::as_str).is_none() {
            require_str(payload, "wav_path")?;
            require_str(payload, "session_id")?;
            if payload.get("audio_duration").and_then(Value::as_f64).is_none() {
                return Err(EnvelopeError::MissingField("audio_duration"));
            }
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }
}

/// TRANSCRIPTION_DONE: one recording transcribed, or a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionDone {
    pub submission_url: String,
    pub question_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default)]
    pub word_details: Vec<WordDetail>,
    #[serde(default = "default_total_questions")]
    pub total_questions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscriptionDone {
    pub fn from_payload(payload: &Value) -> Result<Self, EnvelopeError> {
        require_str(payload, "submission_url")?;
        require_u64(payload, "question_number")?;
        if payload.get("error").and_then(Value::as_str).is_none() {
            require_str(payload, "transcript")?;
            if !payload
                .get("word_details")
                .map(Value::is_array)
                .unwrap_or(false)
            {
                return Err(EnvelopeError::MissingField("word_details"));
            }
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }
}

/// QUESTION_ANALYSIS_READY: union of the audio and transcript sides for
/// one question. Either side may carry an error instead of data so the
/// analysis stages can short-circuit with an error result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionAnalysisReady {
    pub submission_url: String,
    pub question_number: u32,
    pub total_questions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wav_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default)]
    pub word_details: Vec<WordDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl QuestionAnalysisReady {
    pub fn from_payload(payload: &Value) -> Result<Self, EnvelopeError> {
        require_str(payload, "submission_url")?;
        require_u64(payload, "question_number")?;
        require_u64(payload, "total_questions")?;
        serde_json::from_value(payload.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }
}

/// `*_DONE`: completion of one analysis stage for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDone {
    pub submission_url: String,
    pub question_number: u32,
    pub total_questions: u32,
    pub result: AnalysisOutcome,
}

impl StageDone {
    pub fn from_payload(payload: &Value) -> Result<Self, EnvelopeError> {
        require_str(payload, "submission_url")?;
        require_u64(payload, "question_number")?;
        require_u64(payload, "total_questions")?;
        if payload.get("result").is_none() {
            return Err(EnvelopeError::MissingField("result"));
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }
}

/// ANALYSIS_COMPLETE: the consolidated result for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisComplete {
    pub submission_url: String,
    pub question_number: u32,
    pub total_questions: u32,
    pub result: QuestionResult,
}

impl AnalysisComplete {
    pub fn from_payload(payload: &Value) -> Result<Self, EnvelopeError> {
        require_str(payload, "submission_url")?;
        require_u64(payload, "question_number")?;
        require_u64(payload, "total_questions")?;
        if payload.get("result").is_none() {
            return Err(EnvelopeError::MissingField("result"));
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }
}

/// SUBMISSION_ANALYSIS_COMPLETE: the terminal event for a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionAnalysisComplete {
    pub submission_url: String,
    pub total_questions: u32,
    pub results: Vec<QuestionResult>,
}

impl SubmissionAnalysisComplete {
    pub fn from_payload(payload: &Value) -> Result<Self, EnvelopeError> {
        require_str(payload, "submission_url")?;
        require_u64(payload, "total_questions")?;
        if !payload.get("results").map(Value::is_array).unwrap_or(false) {
            return Err(EnvelopeError::MissingField("results"));
        }
        serde_json::from_value(payload.clone())
            .map_err(|e| EnvelopeError::MalformedEnvelope(e.to_string()))
    }
}
