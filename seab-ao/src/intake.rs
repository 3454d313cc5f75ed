//! Submission intake: fan-out of one submission into per-question audio
//! and transcription work.
//!
//! Both pipelines run in parallel for every question. Each side publishes
//! its completion event whether it succeeded or failed; the coordinator
//! pairs them up downstream. One question failing never blocks another.

use crate::bus::BusClient;
use crate::file_sessions::FileSessionManager;
use crate::services::{AudioTranscoder, SpeechToText};
use crate::sse::{AoEvent, SseBroadcaster};
use chrono::Utc;
use futures::future::join_all;
use seab_common::events::{
    AudioConversionDone, StudentSubmission, Topic, TranscriptionDone,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Drives the conversion and transcription collaborators for an admitted
/// submission.
pub struct IntakeService {
    bus: Arc<BusClient>,
    sse: SseBroadcaster,
    file_sessions: Arc<FileSessionManager>,
    transcoder: Arc<dyn AudioTranscoder>,
    speech_to_text: Arc<dyn SpeechToText>,
    work_dir: PathBuf,
    cleanup_timeout_minutes: f64,
    fluency_uses_audio: bool,
}

impl IntakeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<BusClient>,
        sse: SseBroadcaster,
        file_sessions: Arc<FileSessionManager>,
        transcoder: Arc<dyn AudioTranscoder>,
        speech_to_text: Arc<dyn SpeechToText>,
        work_dir: PathBuf,
        cleanup_timeout_minutes: f64,
        fluency_uses_audio: bool,
    ) -> Self {
        Self {
            bus,
            sse,
            file_sessions,
            transcoder,
            speech_to_text,
            work_dir,
            cleanup_timeout_minutes,
            fluency_uses_audio,
        }
    }

    /// Process every recording of a submission: audio conversion and
    /// transcription per question, all concurrently. Question numbers are
    /// assigned by enumerating the audio URLs from 1.
    pub async fn process_submission(&self, submission: StudentSubmission) {
        info!(
            submission = %submission.submission_url,
            recordings = submission.audio_urls.len(),
            "Starting parallel audio and transcription processing"
        );

        self.sse.broadcast_lossy(AoEvent::SubmissionReceived {
            submission_url: submission.submission_url.clone(),
            total_questions: submission.total_questions,
            timestamp: Utc::now(),
        });

        let submission_url = submission.submission_url.clone();
        let total_questions = submission.total_questions;
        let jobs = submission
            .audio_urls
            .iter()
            .enumerate()
            .map(|(index, audio_url)| {
                let submission_url = submission_url.clone();
                let question_number = index as u32 + 1;
                async move {
                    tokio::join!(
                        self.convert_question(
                            &submission_url,
                            question_number,
                            total_questions,
                            audio_url,
                        ),
                        self.transcribe_question(
                            &submission_url,
                            question_number,
                            total_questions,
                            audio_url,
                        ),
                    )
                }
            });

        join_all(jobs).await;

        info!(
            submission = %submission.submission_url,
            "Submission intake complete"
        );
    }

    async fn convert_question(
        &self,
        submission_url: &str,
        question_number: u32,
        total_questions: u32,
        audio_url: &str,
    ) {
        let session_id = self
            .file_sessions
            .generate_session_id(submission_url, question_number);
        let wav_path = self.work_dir.join(format!("{session_id}.wav"));

        let message = match self.transcoder.transcode(audio_url, &wav_path).await {
            Ok(converted) => {
                let mut dependencies: HashSet<String> =
                    HashSet::from(["pronunciation".to_string()]);
                if self.fluency_uses_audio {
                    dependencies.insert("fluency".to_string());
                }

                match self
                    .file_sessions
                    .register(
                        &session_id,
                        &converted.wav_path,
                        dependencies,
                        self.cleanup_timeout_minutes,
                    )
                    .await
                {
                    Ok(()) => AudioConversionDone {
                        submission_url: submission_url.to_string(),
                        question_number,
                        wav_path: Some(converted.wav_path.display().to_string()),
                        session_id: Some(session_id),
                        audio_duration: Some(converted.duration_secs),
                        total_questions,
                        audio_url: Some(audio_url.to_string()),
                        error: None,
                    },
                    Err(e) => {
                        error!(
                            submission = %submission_url,
                            question = question_number,
                            error = %e,
                            "Session registration failed"
                        );
                        failed_audio(submission_url, question_number, total_questions, audio_url, e)
                    }
                }
            }
            Err(e) => {
                error!(
                    submission = %submission_url,
                    question = question_number,
                    url = %audio_url,
                    error = %e,
                    "Audio conversion failed"
                );
                failed_audio(submission_url, question_number, total_questions, audio_url, e)
            }
        };

        self.bus.publish(Topic::AudioConversionDone, &message).await;
    }

    async fn transcribe_question(
        &self,
        submission_url: &str,
        question_number: u32,
        total_questions: u32,
        audio_url: &str,
    ) {
        let message = match self.speech_to_text.transcribe(audio_url).await {
            Ok(transcription) => TranscriptionDone {
                submission_url: submission_url.to_string(),
                question_number,
                transcript: Some(transcription.transcript),
                word_details: transcription.word_details,
                total_questions,
                audio_url: Some(audio_url.to_string()),
                error: None,
            },
            Err(e) => {
                error!(
                    submission = %submission_url,
                    question = question_number,
                    url = %audio_url,
                    error = %e,
                    "Transcription failed"
                );
                TranscriptionDone {
                    submission_url: submission_url.to_string(),
                    question_number,
                    transcript: None,
                    word_details: vec![],
                    total_questions,
                    audio_url: Some(audio_url.to_string()),
                    error: Some(e.to_string()),
                }
            }
        };

        self.bus.publish(Topic::TranscriptionDone, &message).await;
    }
}

fn failed_audio(
    submission_url: &str,
    question_number: u32,
    total_questions: u32,
    audio_url: &str,
    error: impl std::fmt::Display,
) -> AudioConversionDone {
    AudioConversionDone {
        submission_url: submission_url.to_string(),
        question_number,
        wav_path: None,
        session_id: None,
        audio_duration: None,
        total_questions,
        audio_url: Some(audio_url.to_string()),
        error: Some(error.to_string()),
    }
}
