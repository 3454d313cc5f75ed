//! Submission aggregator integration: fan-in, finalization, duration
//! feedback and persistence retry.

mod helpers;

use helpers::*;
use seab_common::db::submissions::{insert_assignment, insert_submission};
use seab_common::events::{
    AnalysisComplete, AnalysisOutcome, QuestionResult, Topic,
};
use serde_json::json;
use std::time::Duration;

fn question_result(submission_url: &str, question_number: u32, errored: bool) -> QuestionResult {
    let outcome = |err: bool| {
        if err {
            AnalysisOutcome::error("upstream unavailable")
        } else {
            AnalysisOutcome::Success(report(80.0))
        }
    };
    QuestionResult {
        submission_url: submission_url.into(),
        question_number,
        pronunciation: outcome(errored),
        grammar: outcome(errored),
        lexical: outcome(errored),
        vocabulary: outcome(errored),
        fluency: outcome(errored),
        transcript: "hello world".into(),
        audio_duration: 45.0,
        duration_feedback: None,
    }
}

fn complete_event(
    submission_url: &str,
    question_number: u32,
    total_questions: u32,
) -> AnalysisComplete {
    AnalysisComplete {
        submission_url: submission_url.into(),
        question_number,
        total_questions,
        result: question_result(submission_url, question_number, false),
    }
}

async fn drain_terminal_events(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<(String, serde_json::Value)>,
) -> Vec<serde_json::Value> {
    let mut seen = Vec::new();
    while let Ok((wire, payload)) = rx.try_recv() {
        if topic_for_wire(&wire) == Some(Topic::SubmissionAnalysisComplete) {
            seen.push(payload);
        }
    }
    seen
}

async fn seed_assignment(state: &seab_ao::AppState, submission_url: &str) {
    insert_assignment(
        &state.db,
        "asg-1",
        &json!([{"timeLimit": 1}, {"timeLimit": 1}, {"timeLimit": 1}]),
    )
    .await
    .unwrap();
    insert_submission(&state.db, submission_url, "asg-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn finalizes_only_after_last_question_lands() {
    let mut harness = build_harness(stub_analyzers()).await;
    seed_assignment(&harness.state, "sub-1").await;

    // Questions complete out of order: 2, 3, then 1.
    harness
        .state
        .aggregator
        .on_analysis_complete(complete_event("sub-1", 2, 3))
        .await;
    harness
        .state
        .aggregator
        .on_analysis_complete(complete_event("sub-1", 3, 3))
        .await;
    assert!(drain_terminal_events(&mut harness.bus_rx).await.is_empty());

    harness
        .state
        .aggregator
        .on_analysis_complete(complete_event("sub-1", 1, 3))
        .await;

    let terminal = drain_terminal_events(&mut harness.bus_rx).await;
    assert_eq!(terminal.len(), 1);

    let results = terminal[0]["results"].as_array().unwrap();
    let order: Vec<u64> = results
        .iter()
        .map(|result| result["question_number"].as_u64().unwrap())
        .collect();
    assert_eq!(order, vec![1, 2, 3]);

    // 45 s against a 1-minute limit is 75%: within the limit.
    for result in results {
        assert_eq!(result["duration_feedback"], "User spoke longer.");
    }

    // Persisted row exists.
    let row: (String, i64) = sqlx::query_as(
        "SELECT submission_url, total_questions FROM submission_results \
         WHERE submission_url = ?",
    )
    .bind("sub-1")
    .fetch_one(&harness.state.db)
    .await
    .unwrap();
    assert_eq!(row, ("sub-1".to_string(), 3));

    let aggregate = harness.state.results.get_raw("sub-1").await.unwrap();
    assert!(aggregate.finalized);
}

#[tokio::test]
async fn replayed_events_do_not_refinalize() {
    let mut harness = build_harness(stub_analyzers()).await;
    seed_assignment(&harness.state, "sub-1").await;

    for _ in 0..2 {
        for question in 1..=2 {
            harness
                .state
                .aggregator
                .on_analysis_complete(complete_event("sub-1", question, 2))
                .await;
        }
    }

    let terminal = drain_terminal_events(&mut harness.bus_rx).await;
    assert_eq!(terminal.len(), 1, "finalize is exactly-once under replay");

    // Replay converged on the same aggregate.
    let aggregate = harness.state.results.get_raw("sub-1").await.unwrap();
    assert!(aggregate.finalized);
    assert_eq!(aggregate.results.len(), 2);
}

#[tokio::test]
async fn missing_time_limit_yields_error_feedback() {
    let mut harness = build_harness(stub_analyzers()).await;
    // No assignment row seeded: lookup yields no limit.

    harness
        .state
        .aggregator
        .on_analysis_complete(complete_event("sub-1", 1, 1))
        .await;

    let terminal = drain_terminal_events(&mut harness.bus_rx).await;
    assert_eq!(terminal.len(), 1);
    assert_eq!(
        terminal[0]["results"][0]["duration_feedback"],
        json!({"error": "no_time_limit"})
    );
}

#[tokio::test]
async fn all_error_question_is_not_a_blocker() {
    let mut harness = build_harness(stub_analyzers()).await;
    seed_assignment(&harness.state, "sub-1").await;

    let mut event = complete_event("sub-1", 1, 2);
    event.result = question_result("sub-1", 1, true);
    harness.state.aggregator.on_analysis_complete(event).await;
    harness
        .state
        .aggregator
        .on_analysis_complete(complete_event("sub-1", 2, 2))
        .await;

    let terminal = drain_terminal_events(&mut harness.bus_rx).await;
    assert_eq!(terminal.len(), 1, "errored questions do not block finalize");
    assert!(terminal[0]["results"][0]["pronunciation"]["error"].is_string());
}

#[tokio::test]
async fn failed_persistence_marks_submission_and_allows_retry() {
    let mut harness = build_harness(stub_analyzers()).await;
    seed_assignment(&harness.state, "sub-1").await;
    let mut sse_rx = harness.state.sse.subscribe();

    // Break the persistence target before finalize.
    sqlx::query("DROP TABLE submission_results")
        .execute(&harness.state.db)
        .await
        .unwrap();

    harness
        .state
        .aggregator
        .on_analysis_complete(complete_event("sub-1", 1, 1))
        .await;

    assert!(drain_terminal_events(&mut harness.bus_rx).await.is_empty());
    let aggregate = harness.state.results.get_raw("sub-1").await.unwrap();
    assert!(aggregate.finalization_failed);
    assert!(!aggregate.finalized);

    // The alert reached the observability stream.
    let mut saw_alert = false;
    while let Ok(event) = sse_rx.try_recv() {
        if event.event_type() == "FinalizationFailed" {
            saw_alert = true;
        }
    }
    assert!(saw_alert);

    // Restore the table; a manual retry re-runs the step.
    seab_common::db::create_tables(&harness.state.db).await.unwrap();
    assert!(harness.state.aggregator.retry_finalize("sub-1").await);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let terminal = drain_terminal_events(&mut harness.bus_rx).await;
    assert_eq!(terminal.len(), 1);
    assert!(harness.state.results.get_raw("sub-1").await.unwrap().finalized);
}
