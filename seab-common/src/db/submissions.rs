//! Submission queries: time-limit lookup and final-result persistence.

use crate::events::QuestionResult;
use crate::Result;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Per-question time limit in minutes, looked up through the submission's
/// assignment. The assignment's `questions` column is an ordered JSON array
/// of question objects carrying `timeLimit`.
///
/// Returns `None` when the submission or assignment is unknown, the
/// question index is out of range, or the question has no usable limit.
pub async fn get_time_limit_minutes(
    pool: &SqlitePool,
    submission_url: &str,
    question_number: u32,
) -> Result<Option<f64>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT a.questions FROM submissions s \
         JOIN assignments a ON a.guid = s.assignment_guid \
         WHERE s.submission_url = ?",
    )
    .bind(submission_url)
    .fetch_optional(pool)
    .await?;

    let Some((questions_json,)) = row else {
        return Ok(None);
    };

    let questions: Value = match serde_json::from_str(&questions_json) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                submission = %submission_url,
                error = %e,
                "Assignment questions column is not valid JSON"
            );
            return Ok(None);
        }
    };

    if question_number == 0 {
        return Ok(None);
    }

    let limit = questions
        .as_array()
        .and_then(|list| list.get(question_number as usize - 1))
        .and_then(|question| question.get("timeLimit"))
        .and_then(Value::as_f64);

    Ok(limit)
}

/// Persist the final aggregated payload for a submission.
///
/// Uses INSERT OR REPLACE so broker redelivery of the finalize step
/// converges on the same stored row.
pub async fn store_final_result(
    pool: &SqlitePool,
    submission_url: &str,
    total_questions: u32,
    results: &[QuestionResult],
) -> Result<()> {
    let section_feedback = serde_json::to_string(&serde_json::json!({
        "submission_url": submission_url,
        "question_results": results,
    }))?;

    sqlx::query(
        "INSERT OR REPLACE INTO submission_results \
         (submission_url, total_questions, section_feedback, status) \
         VALUES (?, ?, ?, 'completed')",
    )
    .bind(submission_url)
    .bind(total_questions as i64)
    .bind(&section_feedback)
    .execute(pool)
    .await?;

    info!(
        submission = %submission_url,
        total_questions,
        "Persisted final submission result"
    );

    Ok(())
}

/// Insert an assignment with its ordered question list. Used by seeding and
/// tests.
pub async fn insert_assignment(
    pool: &SqlitePool,
    guid: &str,
    questions: &Value,
) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO assignments (guid, questions) VALUES (?, ?)")
        .bind(guid)
        .bind(questions.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert a submission row linked to an assignment. Used by seeding and
/// tests.
pub async fn insert_submission(
    pool: &SqlitePool,
    submission_url: &str,
    assignment_guid: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO submissions (submission_url, assignment_guid) VALUES (?, ?)",
    )
    .bind(submission_url)
    .bind(assignment_guid)
    .execute(pool)
    .await?;
    Ok(())
}
