//! Analysis orchestrator: per-question fan-out of the analysis stages.
//!
//! One QUESTION_ANALYSIS_READY launches pronunciation, grammar, lexical and
//! vocabulary concurrently; fluency is gated on pronunciation completion
//! because it consumes the word-level detail. Each stage runs under a hard
//! timeout and always lands in `done` with a success or error result; no
//! stage retries; redelivery of the triggering event is the retry
//! mechanism, and the `emitted_complete` latch makes that replay safe.
//!
//! Lock discipline: the per-key state map is only held to flip stage flags
//! and latches; analyzer calls, publishes and file-session marks all happen
//! outside it.

use crate::bus::BusClient;
use crate::coordinator::QuestionKey;
use crate::file_sessions::FileSessionManager;
use crate::results_store::ResultsStore;
use crate::services::{AnalyzerError, AnalyzerSet};
use crate::sse::{AoEvent, SseBroadcaster};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use seab_common::events::{
    AnalysisComplete, AnalysisOutcome, AnalysisReport, QuestionAnalysisReady, QuestionResult,
    Stage, StageDone, Topic, WordDetail,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct AnalysisState {
    ready: QuestionAnalysisReady,
    outcomes: HashMap<Stage, AnalysisOutcome>,
    pronunciation_words: Vec<WordDetail>,
    fluency_launched: bool,
    pronunciation_completed_at: Option<Instant>,
    fluency_started_at: Option<Instant>,
    emitted_complete: bool,
    created_at: DateTime<Utc>,
}

impl AnalysisState {
    fn new(ready: QuestionAnalysisReady) -> Self {
        Self {
            ready,
            outcomes: HashMap::new(),
            pronunciation_words: Vec::new(),
            fluency_launched: false,
            pronunciation_completed_at: None,
            fluency_started_at: None,
            emitted_complete: false,
            created_at: Utc::now(),
        }
    }
}

/// Timing snapshot of the pronunciation→fluency gate (observability).
#[derive(Debug, Clone, Copy)]
pub struct GateTiming {
    pub pronunciation_completed_at: Option<Instant>,
    pub fluency_started_at: Option<Instant>,
}

struct Inner {
    states: Mutex<HashMap<QuestionKey, AnalysisState>>,
    bus: Arc<BusClient>,
    sse: SseBroadcaster,
    file_sessions: Arc<FileSessionManager>,
    results: Arc<ResultsStore>,
    analyzers: AnalyzerSet,
    stage_timeout: Duration,
    fluency_uses_audio: bool,
}

/// Per-question fan-out state machine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    inner: Arc<Inner>,
}

impl AnalysisOrchestrator {
    pub fn new(
        bus: Arc<BusClient>,
        sse: SseBroadcaster,
        file_sessions: Arc<FileSessionManager>,
        results: Arc<ResultsStore>,
        analyzers: AnalyzerSet,
        stage_timeout: Duration,
        fluency_uses_audio: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                bus,
                sse,
                file_sessions,
                results,
                analyzers,
                stage_timeout,
                fluency_uses_audio,
            }),
        }
    }

    /// Entry point for QUESTION_ANALYSIS_READY. Launches the stage tasks
    /// and returns; completions flow through `complete_stage`. A duplicate
    /// delivery for a live key is dropped here.
    pub async fn on_analysis_ready(&self, ready: QuestionAnalysisReady) {
        let key = QuestionKey::new(&ready.submission_url, ready.question_number);

        {
            let mut states = self.inner.states.lock().await;
            if states.contains_key(&key) {
                debug!(
                    submission = %key.submission_url,
                    question = key.question_number,
                    "Duplicate analysis-ready dropped"
                );
                return;
            }
            states.insert(key.clone(), AnalysisState::new(ready.clone()));
        }

        info!(
            submission = %key.submission_url,
            question = key.question_number,
            "Launching analysis stages"
        );

        let transcript = match (&ready.transcript, &ready.transcript_error) {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(error)) => Err(error.clone()),
            (None, None) => Err("no_transcript".to_string()),
        };
        let wav_path = match (&ready.wav_path, &ready.audio_error) {
            (Some(path), _) => Ok(PathBuf::from(path)),
            (None, Some(error)) => Err(error.clone()),
            (None, None) => Err("no_audio".to_string()),
        };

        self.spawn_pronunciation(key.clone(), wav_path, transcript.clone());
        self.spawn_text_stage(key.clone(), Stage::Grammar, transcript.clone());
        self.spawn_text_stage(key.clone(), Stage::Lexical, transcript.clone());
        self.spawn_text_stage(key, Stage::Vocabulary, transcript);
    }

    fn spawn_pronunciation(
        &self,
        key: QuestionKey,
        wav_path: Result<PathBuf, String>,
        transcript: Result<String, String>,
    ) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let (outcome, words) = match (wav_path, transcript) {
                (Ok(wav_path), Ok(transcript)) => {
                    let analyzer = Arc::clone(&orchestrator.inner.analyzers.pronunciation);
                    let mut words = Vec::new();
                    let outcome = run_stage(orchestrator.inner.stage_timeout, async {
                        let assessment = analyzer.analyze(&wav_path, &transcript).await?;
                        words = assessment.word_details;
                        Ok(assessment.report)
                    })
                    .await;
                    (outcome, words)
                }
                (Err(error), _) | (_, Err(error)) => (AnalysisOutcome::error(error), Vec::new()),
            };

            orchestrator
                .complete_stage(key, Stage::Pronunciation, outcome, words)
                .await;
        });
    }

    fn spawn_text_stage(
        &self,
        key: QuestionKey,
        stage: Stage,
        transcript: Result<String, String>,
    ) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let outcome = match transcript {
                Ok(transcript) => {
                    let analyzer = match stage {
                        Stage::Grammar => Arc::clone(&orchestrator.inner.analyzers.grammar),
                        Stage::Lexical => Arc::clone(&orchestrator.inner.analyzers.lexical),
                        _ => Arc::clone(&orchestrator.inner.analyzers.vocabulary),
                    };
                    run_stage(orchestrator.inner.stage_timeout, async move {
                        analyzer.analyze(&transcript).await
                    })
                    .await
                }
                Err(error) => AnalysisOutcome::error(error),
            };

            orchestrator
                .complete_stage(key, stage, outcome, Vec::new())
                .await;
        });
    }

    fn spawn_fluency(&self, key: QuestionKey) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let input = {
                let mut states = orchestrator.inner.states.lock().await;
                let Some(state) = states.get_mut(&key) else {
                    return;
                };
                state.fluency_started_at = Some(Instant::now());
                (
                    state.ready.transcript.clone(),
                    state.ready.transcript_error.clone(),
                    state.pronunciation_words.clone(),
                )
            };

            let outcome = match input {
                (Some(transcript), _, words) if !words.is_empty() => {
                    let analyzer = Arc::clone(&orchestrator.inner.analyzers.fluency);
                    run_stage(orchestrator.inner.stage_timeout, async move {
                        analyzer.analyze(&transcript, &words).await
                    })
                    .await
                }
                (Some(_), _, _) => AnalysisOutcome::error("no_pronunciation_detail"),
                (None, Some(error), _) => AnalysisOutcome::error(error),
                (None, None, _) => AnalysisOutcome::error("no_transcript"),
            };

            orchestrator
                .complete_stage(key, Stage::Fluency, outcome, Vec::new())
                .await;
        });
    }

    /// Record one stage completion. Flags and latches flip under the state
    /// lock; publishes, file-session marks and the consolidation write all
    /// happen after it is released.
    async fn complete_stage(
        &self,
        key: QuestionKey,
        stage: Stage,
        outcome: AnalysisOutcome,
        words: Vec<WordDetail>,
    ) {
        let errored = outcome.is_error();
        let (payload, session_id, launch_fluency, consolidation) = {
            let mut states = self.inner.states.lock().await;
            let Some(state) = states.get_mut(&key) else {
                warn!(
                    submission = %key.submission_url,
                    question = key.question_number,
                    stage = %stage,
                    "Stage completion for purged state dropped"
                );
                return;
            };

            if state.outcomes.contains_key(&stage) {
                debug!(
                    submission = %key.submission_url,
                    question = key.question_number,
                    stage = %stage,
                    "Stage already done, completion dropped"
                );
                return;
            }
            state.outcomes.insert(stage, outcome.clone());

            let mut launch_fluency = false;
            if stage == Stage::Pronunciation {
                state.pronunciation_completed_at = Some(Instant::now());
                state.pronunciation_words = words;
                if !state.fluency_launched {
                    state.fluency_launched = true;
                    launch_fluency = true;
                }
            }

            let consolidation = if state.outcomes.len() == Stage::all().len()
                && !state.emitted_complete
            {
                state.emitted_complete = true;
                Some((state.ready.clone(), state.outcomes.clone()))
            } else {
                None
            };

            let payload = StageDone {
                submission_url: state.ready.submission_url.clone(),
                question_number: state.ready.question_number,
                total_questions: state.ready.total_questions,
                result: outcome,
            };
            (
                payload,
                state.ready.session_id.clone(),
                launch_fluency,
                consolidation,
            )
        };

        info!(
            submission = %key.submission_url,
            question = key.question_number,
            stage = %stage,
            errored,
            "Stage completed"
        );

        self.inner.bus.publish(stage.done_topic(), &payload).await;
        self.inner.sse.broadcast_lossy(AoEvent::StageCompleted {
            submission_url: key.submission_url.clone(),
            question_number: key.question_number,
            stage,
            errored,
            timestamp: Utc::now(),
        });

        // Stages that consumed the local audio release their hold on the
        // file even when they failed, so the file is never stranded.
        let consumed_audio = stage == Stage::Pronunciation
            || (stage == Stage::Fluency && self.inner.fluency_uses_audio);
        if consumed_audio {
            if let Some(session_id) = &session_id {
                self.inner
                    .file_sessions
                    .mark_service_complete(session_id, stage.as_str())
                    .await;
            }
        }

        if launch_fluency {
            self.spawn_fluency(key.clone());
        }

        if let Some((ready, outcomes)) = consolidation {
            self.consolidate(key, ready, outcomes).await;
        }
    }

    /// Build the QuestionResult, store it, and publish ANALYSIS_COMPLETE.
    /// Reached exactly once per state lifetime.
    async fn consolidate(
        &self,
        key: QuestionKey,
        ready: QuestionAnalysisReady,
        mut outcomes: HashMap<Stage, AnalysisOutcome>,
    ) {
        let mut outcome_for = |stage: Stage| -> AnalysisOutcome {
            outcomes
                .remove(&stage)
                .unwrap_or_else(AnalysisOutcome::missing)
        };

        let result = QuestionResult {
            submission_url: ready.submission_url.clone(),
            question_number: ready.question_number,
            pronunciation: outcome_for(Stage::Pronunciation),
            grammar: outcome_for(Stage::Grammar),
            lexical: outcome_for(Stage::Lexical),
            vocabulary: outcome_for(Stage::Vocabulary),
            fluency: outcome_for(Stage::Fluency),
            transcript: ready.transcript.clone().unwrap_or_default(),
            audio_duration: ready.audio_duration.unwrap_or(0.0),
            duration_feedback: None,
        };

        self.inner
            .results
            .store(&ready.submission_url, ready.total_questions, result.clone())
            .await;

        info!(
            submission = %key.submission_url,
            question = key.question_number,
            "All stages done, publishing analysis-complete"
        );

        let payload = AnalysisComplete {
            submission_url: ready.submission_url.clone(),
            question_number: ready.question_number,
            total_questions: ready.total_questions,
            result,
        };
        self.inner
            .bus
            .publish(Topic::AnalysisComplete, &payload)
            .await;
        self.inner.sse.broadcast_lossy(AoEvent::AnalysisComplete {
            submission_url: key.submission_url,
            question_number: key.question_number,
            timestamp: Utc::now(),
        });
    }

    /// Drop analysis states older than the given bound.
    pub async fn purge_older_than(&self, ttl_minutes: f64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds((ttl_minutes * 60.0) as i64);
        let mut states = self.inner.states.lock().await;
        let before = states.len();
        states.retain(|_, state| state.created_at > cutoff);
        before - states.len()
    }

    /// Whether the consolidated result for a key has been emitted.
    pub async fn is_complete(&self, key: &QuestionKey) -> bool {
        self.inner
            .states
            .lock()
            .await
            .get(key)
            .map(|state| state.emitted_complete)
            .unwrap_or(false)
    }

    /// Pronunciation→fluency gate instants for a key (observability).
    pub async fn gate_timing(&self, key: &QuestionKey) -> Option<GateTiming> {
        self.inner
            .states
            .lock()
            .await
            .get(key)
            .map(|state| GateTiming {
                pronunciation_completed_at: state.pronunciation_completed_at,
                fluency_started_at: state.fluency_started_at,
            })
    }
}

async fn run_stage<F>(timeout: Duration, analysis: F) -> AnalysisOutcome
where
    F: Future<Output = Result<AnalysisReport, AnalyzerError>>,
{
    match tokio::time::timeout(timeout, analysis).await {
        Ok(Ok(report)) => AnalysisOutcome::Success(report),
        Ok(Err(e)) => AnalysisOutcome::error(e.to_string()),
        Err(_) => AnalysisOutcome::error("timeout"),
    }
}
