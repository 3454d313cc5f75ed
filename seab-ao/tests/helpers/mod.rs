//! Shared fixtures for integration tests: a capturing bus transport, stub
//! collaborators, and router plumbing.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use seab_ao::bus::{BusClient, BusError, BusTransport};
use seab_ao::lexicon::{self, CefrLevel, Lexicon};
use seab_ao::services::{
    AnalyzerError, AnalyzerSet, AudioTranscoder, FluencyAnalyzer, PronunciationAnalyzer,
    PronunciationAssessment, SpeechToText, TextAnalyzer, TranscodeError, TranscodedAudio,
    TranscribeError, Transcription,
};
use seab_ao::{AppState, Collaborators};
use seab_common::config::OrchestratorConfig;
use seab_common::events::{AnalysisReport, Topic, WordDetail};
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Transport that records every publish for assertions.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

#[async_trait]
impl BusTransport for ChannelTransport {
    async fn publish(&self, wire_topic: &str, payload: &Value) -> Result<String, BusError> {
        let _ = self.tx.send((wire_topic.to_string(), payload.clone()));
        Ok("test-message".into())
    }
}

pub fn channel_bus() -> (Arc<BusClient>, mpsc::UnboundedReceiver<(String, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let bus = Arc::new(BusClient::with_transport(
        Default::default(),
        Arc::new(ChannelTransport { tx }),
    ));
    (bus, rx)
}

/// Resolve a captured wire topic back to its logical topic.
pub fn topic_for_wire(wire_topic: &str) -> Option<Topic> {
    Topic::all()
        .iter()
        .copied()
        .find(|topic| topic.default_wire_id() == wire_topic)
}

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

/// Writes a placeholder WAV and reports a fixed duration.
pub struct StubTranscoder {
    pub duration_secs: f64,
    pub fail: bool,
}

#[async_trait]
impl AudioTranscoder for StubTranscoder {
    async fn transcode(
        &self,
        _audio_url: &str,
        wav_path: &Path,
    ) -> Result<TranscodedAudio, TranscodeError> {
        if self.fail {
            return Err(TranscodeError::Conversion("ffmpeg exited with 1".into()));
        }
        if let Some(parent) = wav_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(wav_path, b"RIFF-stub").await?;
        Ok(TranscodedAudio {
            wav_path: wav_path.to_path_buf(),
            duration_secs: self.duration_secs,
        })
    }
}

pub struct StubSpeechToText {
    pub transcript: String,
    pub fail: bool,
}

#[async_trait]
impl SpeechToText for StubSpeechToText {
    async fn transcribe(&self, _audio_url: &str) -> Result<Transcription, TranscribeError> {
        if self.fail {
            return Err(TranscribeError::Api(503, "no capacity".into()));
        }
        Ok(Transcription {
            transcript: self.transcript.clone(),
            word_details: sample_words(),
        })
    }
}

pub fn sample_words() -> Vec<WordDetail> {
    vec![
        WordDetail {
            word: "hello".into(),
            accuracy_score: Some(92.0),
            error_type: None,
            offset_ms: Some(0),
            duration_ms: Some(300),
        },
        WordDetail {
            word: "world".into(),
            accuracy_score: Some(88.0),
            error_type: None,
            offset_ms: Some(350),
            duration_ms: Some(280),
        },
    ]
}

pub fn report(grade: f64) -> AnalysisReport {
    AnalysisReport {
        grade,
        issues: vec![],
        detail: Value::Null,
    }
}

/// Text-stage stub with optional delay and failure.
pub struct StubTextAnalyzer {
    pub grade: f64,
    pub delay: Duration,
    pub fail_with: Option<String>,
}

impl StubTextAnalyzer {
    pub fn ok(grade: f64) -> Self {
        Self {
            grade,
            delay: Duration::ZERO,
            fail_with: None,
        }
    }

    pub fn slow(grade: f64, delay: Duration) -> Self {
        Self {
            grade,
            delay,
            fail_with: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            grade: 0.0,
            delay: Duration::ZERO,
            fail_with: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl TextAnalyzer for StubTextAnalyzer {
    async fn analyze(&self, _transcript: &str) -> Result<AnalysisReport, AnalyzerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.fail_with {
            Some(message) => Err(AnalyzerError::Api(500, message.clone())),
            None => Ok(report(self.grade)),
        }
    }
}

pub struct StubPronunciationAnalyzer {
    pub grade: f64,
    pub delay: Duration,
    pub with_word_details: bool,
}

#[async_trait]
impl PronunciationAnalyzer for StubPronunciationAnalyzer {
    async fn analyze(
        &self,
        _wav_path: &Path,
        _transcript: &str,
    ) -> Result<PronunciationAssessment, AnalyzerError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(PronunciationAssessment {
            report: report(self.grade),
            word_details: if self.with_word_details {
                sample_words()
            } else {
                vec![]
            },
        })
    }
}

pub struct StubFluencyAnalyzer {
    pub grade: f64,
}

#[async_trait]
impl FluencyAnalyzer for StubFluencyAnalyzer {
    async fn analyze(
        &self,
        _transcript: &str,
        _word_details: &[WordDetail],
    ) -> Result<AnalysisReport, AnalyzerError> {
        Ok(report(self.grade))
    }
}

/// All-stages-succeed analyzer set.
pub fn stub_analyzers() -> AnalyzerSet {
    AnalyzerSet {
        pronunciation: Arc::new(StubPronunciationAnalyzer {
            grade: 85.0,
            delay: Duration::ZERO,
            with_word_details: true,
        }),
        grammar: Arc::new(StubTextAnalyzer::ok(78.0)),
        lexical: Arc::new(StubTextAnalyzer::ok(74.0)),
        vocabulary: Arc::new(StubTextAnalyzer::ok(69.0)),
        fluency: Arc::new(StubFluencyAnalyzer { grade: 81.0 }),
    }
}

pub fn stub_collaborators(analyzers: AnalyzerSet) -> Collaborators {
    Collaborators {
        transcoder: Arc::new(StubTranscoder {
            duration_secs: 30.0,
            fail: false,
        }),
        speech_to_text: Arc::new(StubSpeechToText {
            transcript: "hello world".into(),
            fail: false,
        }),
        analyzers,
    }
}

// ---------------------------------------------------------------------------
// State and router assembly
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub state: AppState,
    pub bus_rx: mpsc::UnboundedReceiver<(String, Value)>,
    pub work_dir: TempDir,
}

pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    seab_common::db::create_tables(&pool).await.expect("schema");
    pool
}

pub fn install_test_lexicon() {
    lexicon::init_with(Lexicon::from_entries([
        ("hello".to_string(), CefrLevel::A1),
        ("world".to_string(), CefrLevel::A1),
        ("market".to_string(), CefrLevel::A2),
    ]));
}

/// Assemble an AppState over stubs and a capturing bus.
pub async fn build_harness(analyzers: AnalyzerSet) -> TestHarness {
    build_harness_with(analyzers, |_| {}).await
}

pub async fn build_harness_with(
    analyzers: AnalyzerSet,
    tweak: impl FnOnce(&mut OrchestratorConfig),
) -> TestHarness {
    let collaborators = stub_collaborators(analyzers);
    build_custom_harness(collaborators, tweak).await
}

pub async fn build_custom_harness(
    collaborators: Collaborators,
    tweak: impl FnOnce(&mut OrchestratorConfig),
) -> TestHarness {
    install_test_lexicon();

    let work_dir = TempDir::new().expect("temp work dir");
    let mut config = OrchestratorConfig::default();
    config.work_dir = work_dir.path().to_path_buf();
    config.analysis.timeout_secs = 5;
    tweak(&mut config);

    let (bus, bus_rx) = channel_bus();
    let db = test_pool().await;
    let state = AppState::assemble(db, config, bus, collaborators);

    TestHarness {
        state,
        bus_rx,
        work_dir,
    }
}

// ---------------------------------------------------------------------------
// Router driving
// ---------------------------------------------------------------------------

pub async fn post_json(router: &Router, path: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");

    send(router, request).await
}

pub async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .expect("request");

    send(router, request).await
}

pub async fn delete(router: &Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("DELETE")
        .uri(path)
        .body(Body::empty())
        .expect("request");

    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router response");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Poll until `condition` holds or the deadline passes.
pub async fn wait_until<F, Fut>(deadline: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let started = std::time::Instant::now();
    loop {
        if condition().await {
            return;
        }
        assert!(
            started.elapsed() < deadline,
            "condition not reached within {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
