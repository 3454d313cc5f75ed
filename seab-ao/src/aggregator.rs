//! Submission aggregator: per-submission fan-in of question completions.
//!
//! Each ANALYSIS_COMPLETE is written into the results store, and once every
//! question of the submission has a stored result the aggregate is
//! finalized: duration feedback is attached, the payload is persisted with
//! bounded backoff, and the terminal event is published. The finalize claim
//! in the store keeps the step single-shot without holding any lock across
//! the database write.

use crate::bus::BusClient;
use crate::feedback::duration_feedback;
use crate::results_store::{FinalizeDecision, ResultsStore};
use crate::sse::{AoEvent, SseBroadcaster};
use chrono::Utc;
use seab_common::db::submissions::{get_time_limit_minutes, store_final_result};
use seab_common::events::{
    AnalysisComplete, QuestionResult, SubmissionAnalysisComplete, Topic,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff between persistence attempts. The attempt count is bounded;
/// terminal failure leaves the submission retryable.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(400),
    Duration::from_millis(1600),
];

/// Per-submission fan-in and finalization.
pub struct SubmissionAggregator {
    results: Arc<ResultsStore>,
    db: SqlitePool,
    bus: Arc<BusClient>,
    sse: SseBroadcaster,
}

impl SubmissionAggregator {
    pub fn new(
        results: Arc<ResultsStore>,
        db: SqlitePool,
        bus: Arc<BusClient>,
        sse: SseBroadcaster,
    ) -> Self {
        Self {
            results,
            db,
            bus,
            sse,
        }
    }

    /// Entry point for ANALYSIS_COMPLETE.
    pub async fn on_analysis_complete(&self, event: AnalysisComplete) {
        let submission_url = event.submission_url.clone();
        let total_questions = event.total_questions;

        self.results
            .store(&submission_url, total_questions, event.result)
            .await;

        let completed = self.results.completed_count(&submission_url).await;
        if (completed as u32) < total_questions {
            info!(
                submission = %submission_url,
                completed,
                total = total_questions,
                "Waiting for remaining questions"
            );
            return;
        }

        match self.results.try_begin_finalize(&submission_url).await {
            FinalizeDecision::Ready(results) => {
                self.finalize(&submission_url, total_questions, results).await;
            }
            FinalizeDecision::AlreadyFinalized => {
                info!(submission = %submission_url, "Finalize already done or in flight");
            }
            FinalizeDecision::NotReady => {}
        }
    }

    /// Re-run the finalize step for a submission whose persistence failed.
    pub async fn retry_finalize(&self, submission_url: &str) -> bool {
        match self.results.try_begin_finalize(submission_url).await {
            FinalizeDecision::Ready(results) => {
                let total_questions = results.len() as u32;
                self.finalize(submission_url, total_questions, results).await;
                true
            }
            _ => false,
        }
    }

    async fn finalize(
        &self,
        submission_url: &str,
        total_questions: u32,
        mut results: Vec<QuestionResult>,
    ) {
        // Attach per-question duration feedback from the assignment's time
        // limits before persisting.
        for result in &mut results {
            let time_limit = match get_time_limit_minutes(
                &self.db,
                submission_url,
                result.question_number,
            )
            .await
            {
                Ok(limit) => limit,
                Err(e) => {
                    warn!(
                        submission = %submission_url,
                        question = result.question_number,
                        error = %e,
                        "Time limit lookup failed"
                    );
                    None
                }
            };
            result.duration_feedback = Some(duration_feedback(result.audio_duration, time_limit));
        }

        if let Err(e) = self
            .persist_with_backoff(submission_url, total_questions, &results)
            .await
        {
            error!(
                submission = %submission_url,
                error = %e,
                "Final persistence failed after bounded retries"
            );
            self.results.mark_finalization_failed(submission_url).await;
            self.sse.broadcast_lossy(AoEvent::FinalizationFailed {
                submission_url: submission_url.to_string(),
                error: e.to_string(),
                timestamp: Utc::now(),
            });
            return;
        }

        self.results
            .mark_finalized(submission_url, results.clone())
            .await;

        info!(
            submission = %submission_url,
            total_questions,
            "Submission finalized"
        );

        let payload = SubmissionAnalysisComplete {
            submission_url: submission_url.to_string(),
            total_questions,
            results,
        };
        self.bus
            .publish(Topic::SubmissionAnalysisComplete, &payload)
            .await;
        self.sse.broadcast_lossy(AoEvent::SubmissionFinalized {
            submission_url: submission_url.to_string(),
            total_questions,
            timestamp: Utc::now(),
        });
    }

    async fn persist_with_backoff(
        &self,
        submission_url: &str,
        total_questions: u32,
        results: &[QuestionResult],
    ) -> seab_common::Result<()> {
        let mut last_error = None;
        for (attempt, delay) in std::iter::once(None)
            .chain(RETRY_DELAYS.iter().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                tokio::time::sleep(*delay).await;
            }

            match store_final_result(&self.db, submission_url, total_questions, results).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        submission = %submission_url,
                        attempt = attempt + 1,
                        error = %e,
                        "Final persistence attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| seab_common::Error::Internal("persistence never attempted".into())))
    }
}
