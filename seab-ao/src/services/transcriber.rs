//! Speech-to-text collaborator.

use async_trait::async_trait;
use seab_common::events::WordDetail;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Transcription client errors
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Transcript text plus word-level timing.
#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub transcript: String,
    #[serde(default)]
    pub word_details: Vec<WordDetail>,
}

/// Seam for the speech-to-text step.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<Transcription, TranscribeError>;
}

/// HTTP client for the speech-to-text service.
pub struct HttpSpeechToText {
    http_client: reqwest::Client,
    url: String,
}

impl HttpSpeechToText {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self, TranscribeError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TranscribeError::Network(e.to_string()))?;
        Ok(Self { http_client, url })
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn transcribe(&self, audio_url: &str) -> Result<Transcription, TranscribeError> {
        let response = self
            .http_client
            .post(&self.url)
            .json(&serde_json::json!({ "audio_url": audio_url }))
            .send()
            .await
            .map_err(|e| TranscribeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Api(status.as_u16(), text));
        }

        let transcription: Transcription = response
            .json()
            .await
            .map_err(|e| TranscribeError::Parse(e.to_string()))?;

        info!(
            url = %audio_url,
            words = transcription.word_details.len(),
            "Transcription received"
        );
        Ok(transcription)
    }
}
