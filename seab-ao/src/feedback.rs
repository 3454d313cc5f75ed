//! Speaking-time feedback.

use seab_common::events::DurationFeedback;

/// Compare spoken duration against the question's time limit.
///
/// With ratio `r = duration / (60 * limit) * 100`: under 50 the student
/// barely spoke, between 50 and 100 inclusive they used the time well, and
/// over 100 they ran past the limit. A missing or non-positive limit yields
/// the `no_time_limit` error shape.
pub fn duration_feedback(
    audio_duration_secs: f64,
    time_limit_minutes: Option<f64>,
) -> DurationFeedback {
    let Some(limit) = time_limit_minutes.filter(|limit| *limit > 0.0) else {
        return DurationFeedback::Error {
            error: "no_time_limit".to_string(),
        };
    };

    let ratio = audio_duration_secs / (60.0 * limit) * 100.0;
    let message = if ratio < 50.0 {
        "Did not speak that much."
    } else if ratio <= 100.0 {
        "User spoke longer."
    } else {
        "User exceeded the time limit."
    };
    DurationFeedback::Message(message.to_string())
}
