//! Analysis coordinator: per-question fan-in of audio and transcript.
//!
//! Both webhook entry points follow the same protocol: record the arriving
//! side under the state lock, and when both sides are present emit
//! QUESTION_ANALYSIS_READY exactly once per state lifetime. The publish
//! happens after the lock is released; only the `emitted` latch is flipped
//! inside it. Purged states are recreated on redelivery, which may re-emit;
//! downstream idempotence absorbs that.

use crate::bus::BusClient;
use crate::sse::{AoEvent, SseBroadcaster};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use seab_common::events::{
    AudioConversionDone, QuestionAnalysisReady, Topic, TranscriptionDone,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Key identifying one recording to analyze.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestionKey {
    pub submission_url: String,
    pub question_number: u32,
}

impl QuestionKey {
    pub fn new(submission_url: &str, question_number: u32) -> Self {
        Self {
            submission_url: submission_url.to_string(),
            question_number,
        }
    }
}

#[derive(Debug, Clone)]
struct CoordinationState {
    audio: Option<AudioConversionDone>,
    transcript: Option<TranscriptionDone>,
    emitted: bool,
    created_at: DateTime<Utc>,
}

impl CoordinationState {
    fn new() -> Self {
        Self {
            audio: None,
            transcript: None,
            emitted: false,
            created_at: Utc::now(),
        }
    }
}

/// Per-question fan-in state machine.
pub struct AnalysisCoordinator {
    states: Mutex<HashMap<QuestionKey, CoordinationState>>,
    bus: Arc<BusClient>,
    sse: SseBroadcaster,
}

impl AnalysisCoordinator {
    pub fn new(bus: Arc<BusClient>, sse: SseBroadcaster) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            bus,
            sse,
        }
    }

    /// Audio conversion finished (or failed) for one question.
    pub async fn on_audio_ready(&self, message: AudioConversionDone) {
        let key = QuestionKey::new(&message.submission_url, message.question_number);
        let ready = {
            let mut states = self.states.lock().await;
            let state = states.entry(key.clone()).or_insert_with(CoordinationState::new);

            if state.audio.is_some() {
                debug!(
                    submission = %key.submission_url,
                    question = key.question_number,
                    "Duplicate audio-ready discarded"
                );
                return;
            }
            state.audio = Some(message);
            take_ready_payload(state)
        };

        if let Some(payload) = ready {
            self.emit_ready(key, payload).await;
        }
    }

    /// Transcription finished (or failed) for one question.
    pub async fn on_transcript_ready(&self, message: TranscriptionDone) {
        let key = QuestionKey::new(&message.submission_url, message.question_number);
        let ready = {
            let mut states = self.states.lock().await;
            let state = states.entry(key.clone()).or_insert_with(CoordinationState::new);

            if state.transcript.is_some() {
                debug!(
                    submission = %key.submission_url,
                    question = key.question_number,
                    "Duplicate transcript-ready discarded"
                );
                return;
            }
            state.transcript = Some(message);
            take_ready_payload(state)
        };

        if let Some(payload) = ready {
            self.emit_ready(key, payload).await;
        }
    }

    /// Drop coordination states older than the given bound. Later arrivals
    /// for a purged key start a fresh state.
    pub async fn purge_older_than(&self, ttl_minutes: f64) -> usize {
        let cutoff = Utc::now() - ChronoDuration::seconds((ttl_minutes * 60.0) as i64);
        let mut states = self.states.lock().await;
        let before = states.len();
        states.retain(|_, state| state.created_at > cutoff);
        before - states.len()
    }

    /// Number of live coordination states (observability).
    pub async fn pending_count(&self) -> usize {
        self.states.lock().await.len()
    }

    async fn emit_ready(&self, key: QuestionKey, payload: QuestionAnalysisReady) {
        info!(
            submission = %key.submission_url,
            question = key.question_number,
            audio_errored = payload.audio_error.is_some(),
            transcript_errored = payload.transcript_error.is_some(),
            "Both sides arrived, publishing analysis-ready"
        );

        self.bus.publish(Topic::QuestionAnalysisReady, &payload).await;
        self.sse.broadcast_lossy(AoEvent::QuestionAnalysisReady {
            submission_url: key.submission_url,
            question_number: key.question_number,
            timestamp: Utc::now(),
        });
    }
}

/// If both sides have arrived and nothing was emitted yet, flip the latch
/// and build the union payload. Called with the state lock held.
fn take_ready_payload(state: &mut CoordinationState) -> Option<QuestionAnalysisReady> {
    if state.emitted {
        return None;
    }
    let (Some(audio), Some(transcript)) = (&state.audio, &state.transcript) else {
        return None;
    };
    state.emitted = true;

    Some(QuestionAnalysisReady {
        submission_url: audio.submission_url.clone(),
        question_number: audio.question_number,
        total_questions: audio.total_questions.max(transcript.total_questions),
        session_id: audio.session_id.clone(),
        wav_path: audio.wav_path.clone(),
        audio_duration: audio.audio_duration,
        audio_error: audio.error.clone(),
        transcript: transcript.transcript.clone(),
        word_details: transcript.word_details.clone(),
        transcript_error: transcript.error.clone(),
        audio_url: audio.audio_url.clone().or_else(|| transcript.audio_url.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use seab_common::config::BrokerConfig;

    fn coordinator() -> AnalysisCoordinator {
        let bus = Arc::new(BusClient::new(BrokerConfig::default()));
        AnalysisCoordinator::new(bus, SseBroadcaster::new(16))
    }

    fn audio(question: u32) -> AudioConversionDone {
        AudioConversionDone {
            submission_url: "sub-1".into(),
            question_number: question,
            wav_path: Some(format!("/tmp/q{question}.wav")),
            session_id: Some(format!("sess-{question}")),
            audio_duration: Some(30.0),
            total_questions: 2,
            audio_url: Some("https://store/a.webm".into()),
            error: None,
        }
    }

    fn transcript(question: u32) -> TranscriptionDone {
        TranscriptionDone {
            submission_url: "sub-1".into(),
            question_number: question,
            transcript: Some("hello world".into()),
            word_details: vec![],
            total_questions: 2,
            audio_url: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_emits_only_when_both_sides_arrive() {
        let coordinator = coordinator();
        let mut events = coordinator.sse.subscribe();

        coordinator.on_audio_ready(audio(1)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(coordinator.pending_count().await, 1);

        coordinator.on_transcript_ready(transcript(1)).await;
        let event = events.try_recv().unwrap();
        assert_eq!(event.event_type(), "QuestionAnalysisReady");
    }

    #[tokio::test]
    async fn test_order_independent() {
        let coordinator = coordinator();
        let mut events = coordinator.sse.subscribe();

        coordinator.on_transcript_ready(transcript(1)).await;
        coordinator.on_audio_ready(audio(1)).await;
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_duplicates_do_not_reemit() {
        let coordinator = coordinator();
        let mut events = coordinator.sse.subscribe();

        coordinator.on_audio_ready(audio(1)).await;
        coordinator.on_audio_ready(audio(1)).await;
        coordinator.on_transcript_ready(transcript(1)).await;
        coordinator.on_transcript_ready(transcript(1)).await;
        coordinator.on_audio_ready(audio(1)).await;

        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err(), "emitted more than once");
    }

    #[tokio::test]
    async fn test_errored_side_still_emits() {
        let coordinator = coordinator();
        let mut events = coordinator.sse.subscribe();

        let mut errored = audio(1);
        errored.wav_path = None;
        errored.session_id = None;
        errored.audio_duration = None;
        errored.error = Some("ffmpeg exited with status 1".into());

        coordinator.on_audio_ready(errored).await;
        coordinator.on_transcript_ready(transcript(1)).await;
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let coordinator = coordinator();
        let mut events = coordinator.sse.subscribe();

        coordinator.on_audio_ready(audio(1)).await;
        coordinator.on_transcript_ready(transcript(2)).await;
        assert!(events.try_recv().is_err());

        coordinator.on_audio_ready(audio(2)).await;
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_purge_and_redelivery_reemits() {
        let coordinator = coordinator();
        let mut events = coordinator.sse.subscribe();

        coordinator.on_audio_ready(audio(1)).await;
        coordinator.on_transcript_ready(transcript(1)).await;
        assert!(events.try_recv().is_ok());

        assert_eq!(coordinator.purge_older_than(0.0).await, 1);
        assert_eq!(coordinator.pending_count().await, 0);

        // Redelivery after purge starts a fresh state and re-emits.
        coordinator.on_audio_ready(audio(1)).await;
        coordinator.on_transcript_ready(transcript(1)).await;
        assert!(events.try_recv().is_ok());
    }
}
