//! In-memory results store.
//!
//! Process-local, concurrency-safe cache of per-submission aggregates. All
//! operations are atomic from the caller's perspective; two writers for the
//! same question are serialized by the store lock, with the
//! first-writer-wins-unless-upgrading-error-to-success rule applied there.

use seab_common::events::QuestionResult;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Aggregate state for one submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionAggregate {
    pub submission_url: String,
    pub total_questions: u32,
    /// Keyed by question number; iteration order is ascending.
    pub results: BTreeMap<u32, QuestionResult>,
    pub finalized: bool,
    pub finalization_failed: bool,
    #[serde(skip)]
    finalizing: bool,
}

impl SubmissionAggregate {
    fn new(submission_url: &str, total_questions: u32) -> Self {
        Self {
            submission_url: submission_url.to_string(),
            total_questions,
            results: BTreeMap::new(),
            finalized: false,
            finalization_failed: false,
            finalizing: false,
        }
    }

    pub fn completed(&self) -> usize {
        self.results.len()
    }
}

/// Outcome of a `store` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// First write for this question
    Inserted,
    /// Prior entry carried an error and the new one is fully successful
    Upgraded,
    /// Duplicate or downgrade; dropped
    Dropped,
    /// The submission is already finalized; write ignored
    Finalized,
}

/// Decision returned by [`ResultsStore::try_begin_finalize`].
#[derive(Debug)]
pub enum FinalizeDecision {
    /// Not every question has a stored result yet
    NotReady,
    /// Already finalized, or another caller is finalizing right now
    AlreadyFinalized,
    /// Caller owns the finalize step; snapshot of the ordered results
    Ready(Vec<QuestionResult>),
}

/// Process-local mapping from submission to aggregate.
pub struct ResultsStore {
    inner: Mutex<HashMap<String, SubmissionAggregate>>,
}

impl ResultsStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Idempotently insert a question result.
    ///
    /// A later write for the same question overwrites only when the prior
    /// entry has at least one error sub-result and the new one is fully
    /// successful; everything else is dropped.
    pub async fn store(
        &self,
        submission_url: &str,
        total_questions: u32,
        result: QuestionResult,
    ) -> StoreOutcome {
        let question_number = result.question_number;
        let mut inner = self.inner.lock().await;
        let aggregate = inner
            .entry(submission_url.to_string())
            .or_insert_with(|| SubmissionAggregate::new(submission_url, total_questions));

        if aggregate.finalized {
            debug!(
                submission = %submission_url,
                question = question_number,
                "Write for finalized submission ignored"
            );
            return StoreOutcome::Finalized;
        }

        match aggregate.results.get(&question_number) {
            None => {
                aggregate.results.insert(question_number, result);
                info!(
                    submission = %submission_url,
                    question = question_number,
                    completed = aggregate.results.len(),
                    total = aggregate.total_questions,
                    "Stored question result"
                );
                StoreOutcome::Inserted
            }
            Some(existing) => {
                let existing_errors = error_count(existing);
                let incoming_errors = error_count(&result);
                if existing_errors > 0 && incoming_errors == 0 {
                    aggregate.results.insert(question_number, result);
                    info!(
                        submission = %submission_url,
                        question = question_number,
                        "Upgraded errored question result"
                    );
                    StoreOutcome::Upgraded
                } else {
                    debug!(
                        submission = %submission_url,
                        question = question_number,
                        "Duplicate question result dropped"
                    );
                    StoreOutcome::Dropped
                }
            }
        }
    }

    /// Raw aggregate for a submission.
    pub async fn get_raw(&self, submission_url: &str) -> Option<SubmissionAggregate> {
        self.inner.lock().await.get(submission_url).cloned()
    }

    /// Canonicalized list of question results in ascending question order.
    /// Ordering inside a question is fixed by the result schema, not by
    /// completion time.
    pub async fn get_transformed(&self, submission_url: &str) -> Option<Vec<QuestionResult>> {
        self.inner
            .lock()
            .await
            .get(submission_url)
            .map(|aggregate| aggregate.results.values().cloned().collect())
    }

    /// All known submission keys.
    pub async fn list_all(&self) -> Vec<String> {
        self.inner.lock().await.keys().cloned().collect()
    }

    /// Remove an aggregate. Returns whether it existed.
    pub async fn clear(&self, submission_url: &str) -> bool {
        self.inner.lock().await.remove(submission_url).is_some()
    }

    pub async fn has(&self, submission_url: &str) -> bool {
        self.inner.lock().await.contains_key(submission_url)
    }

    /// Number of stored question results for a submission.
    pub async fn completed_count(&self, submission_url: &str) -> usize {
        self.inner
            .lock()
            .await
            .get(submission_url)
            .map(|aggregate| aggregate.results.len())
            .unwrap_or(0)
    }

    /// Claim the finalize step for a submission.
    ///
    /// At most one caller gets `Ready` per successful finalize; the claim is
    /// released by [`Self::mark_finalized`] or
    /// [`Self::mark_finalization_failed`], so persistence runs outside the
    /// store lock without admitting a second finalizer.
    pub async fn try_begin_finalize(&self, submission_url: &str) -> FinalizeDecision {
        let mut inner = self.inner.lock().await;
        let Some(aggregate) = inner.get_mut(submission_url) else {
            return FinalizeDecision::NotReady;
        };

        if aggregate.finalized || aggregate.finalizing {
            return FinalizeDecision::AlreadyFinalized;
        }
        if (aggregate.results.len() as u32) < aggregate.total_questions {
            return FinalizeDecision::NotReady;
        }

        aggregate.finalizing = true;
        FinalizeDecision::Ready(aggregate.results.values().cloned().collect())
    }

    /// Flip the finalized latch, writing back the enriched results that
    /// were persisted. No transition out of `finalized = true`.
    pub async fn mark_finalized(&self, submission_url: &str, results: Vec<QuestionResult>) {
        let mut inner = self.inner.lock().await;
        if let Some(aggregate) = inner.get_mut(submission_url) {
            aggregate.finalizing = false;
            aggregate.finalization_failed = false;
            aggregate.finalized = true;
            aggregate.results = results
                .into_iter()
                .map(|result| (result.question_number, result))
                .collect();
        }
    }

    /// Release the finalize claim after terminal persistence failure, so a
    /// manual retry can re-run the step.
    pub async fn mark_finalization_failed(&self, submission_url: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(aggregate) = inner.get_mut(submission_url) {
            aggregate.finalizing = false;
            aggregate.finalization_failed = true;
            warn!(submission = %submission_url, "Submission marked finalization_failed");
        }
    }
}

impl Default for ResultsStore {
    fn default() -> Self {
        Self::new()
    }
}

fn error_count(result: &QuestionResult) -> usize {
    result
        .outcomes()
        .iter()
        .filter(|(_, outcome)| outcome.is_error())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use seab_common::events::{AnalysisOutcome, AnalysisReport};

    fn success() -> AnalysisOutcome {
        AnalysisOutcome::Success(AnalysisReport {
            grade: 80.0,
            issues: vec![],
            detail: serde_json::Value::Null,
        })
    }

    fn result(question_number: u32, grammar: AnalysisOutcome) -> QuestionResult {
        QuestionResult {
            submission_url: "sub-1".into(),
            question_number,
            pronunciation: success(),
            grammar,
            lexical: success(),
            vocabulary: success(),
            fluency: success(),
            transcript: "hello world".into(),
            audio_duration: 30.0,
            duration_feedback: None,
        }
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let store = ResultsStore::new();
        assert_eq!(
            store.store("sub-1", 1, result(1, success())).await,
            StoreOutcome::Inserted
        );
        assert_eq!(
            store.store("sub-1", 1, result(1, success())).await,
            StoreOutcome::Dropped
        );
        assert_eq!(store.completed_count("sub-1").await, 1);
    }

    #[tokio::test]
    async fn test_error_result_upgrades_to_success() {
        let store = ResultsStore::new();
        store
            .store("sub-1", 1, result(1, AnalysisOutcome::error("timeout")))
            .await;

        // Success replaces the errored entry
        assert_eq!(
            store.store("sub-1", 1, result(1, success())).await,
            StoreOutcome::Upgraded
        );
        // ...but an errored duplicate never replaces the success
        assert_eq!(
            store
                .store("sub-1", 1, result(1, AnalysisOutcome::error("again")))
                .await,
            StoreOutcome::Dropped
        );

        let results = store.get_transformed("sub-1").await.unwrap();
        assert!(!results[0].grammar.is_error());
    }

    #[tokio::test]
    async fn test_partially_errored_result_never_overwrites() {
        let store = ResultsStore::new();
        let mut prior = result(1, AnalysisOutcome::error("timeout"));
        prior.lexical = AnalysisOutcome::error("timeout");
        store.store("sub-1", 1, prior).await;

        // Fewer errors is not enough; only a fully successful result
        // replaces an errored entry.
        let partial = result(1, AnalysisOutcome::error("timeout"));
        assert_eq!(
            store.store("sub-1", 1, partial).await,
            StoreOutcome::Dropped
        );

        let results = store.get_transformed("sub-1").await.unwrap();
        assert!(results[0].lexical.is_error(), "prior entry must be intact");

        assert_eq!(
            store.store("sub-1", 1, result(1, success())).await,
            StoreOutcome::Upgraded
        );
    }

    #[tokio::test]
    async fn test_transformed_is_ordered_by_question_number() {
        let store = ResultsStore::new();
        store.store("sub-1", 3, result(2, success())).await;
        store.store("sub-1", 3, result(3, success())).await;
        store.store("sub-1", 3, result(1, success())).await;

        let results = store.get_transformed("sub-1").await.unwrap();
        let order: Vec<u32> = results.iter().map(|r| r.question_number).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_finalize_claim_is_single_shot() {
        let store = ResultsStore::new();
        store.store("sub-1", 1, result(1, success())).await;

        let first = store.try_begin_finalize("sub-1").await;
        assert!(matches!(first, FinalizeDecision::Ready(_)));
        // Claim is held until marked; a racing caller backs off.
        assert!(matches!(
            store.try_begin_finalize("sub-1").await,
            FinalizeDecision::AlreadyFinalized
        ));

        store
            .mark_finalized("sub-1", vec![result(1, success())])
            .await;
        assert!(matches!(
            store.try_begin_finalize("sub-1").await,
            FinalizeDecision::AlreadyFinalized
        ));

        // Writes after finalization are ignored
        assert_eq!(
            store.store("sub-1", 1, result(1, success())).await,
            StoreOutcome::Finalized
        );
    }

    #[tokio::test]
    async fn test_failed_finalize_can_be_retried() {
        let store = ResultsStore::new();
        store.store("sub-1", 1, result(1, success())).await;

        assert!(matches!(
            store.try_begin_finalize("sub-1").await,
            FinalizeDecision::Ready(_)
        ));
        store.mark_finalization_failed("sub-1").await;

        let raw = store.get_raw("sub-1").await.unwrap();
        assert!(raw.finalization_failed);
        assert!(!raw.finalized);
        assert!(matches!(
            store.try_begin_finalize("sub-1").await,
            FinalizeDecision::Ready(_)
        ));
    }

    #[tokio::test]
    async fn test_not_ready_until_all_questions_stored() {
        let store = ResultsStore::new();
        store.store("sub-1", 2, result(1, success())).await;
        assert!(matches!(
            store.try_begin_finalize("sub-1").await,
            FinalizeDecision::NotReady
        ));

        store.store("sub-1", 2, result(2, success())).await;
        assert!(matches!(
            store.try_begin_finalize("sub-1").await,
            FinalizeDecision::Ready(_)
        ));
    }

    #[tokio::test]
    async fn test_clear_and_membership() {
        let store = ResultsStore::new();
        store.store("sub-1", 1, result(1, success())).await;
        assert!(store.has("sub-1").await);
        assert_eq!(store.list_all().await, vec!["sub-1".to_string()]);
        assert!(store.clear("sub-1").await);
        assert!(!store.clear("sub-1").await);
        assert!(!store.has("sub-1").await);
    }
}
