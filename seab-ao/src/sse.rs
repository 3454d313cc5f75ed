//! Orchestration event stream for real-time observability.
//!
//! Lifecycle events are broadcast on a lossy in-process bus and exposed to
//! clients over SSE. Slow or absent subscribers never block the
//! orchestrator.

use axum::{
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use seab_common::events::Stage;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Orchestration lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AoEvent {
    /// A submission was admitted and its entry event published
    SubmissionReceived {
        submission_url: String,
        total_questions: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Audio and transcript both arrived for a question
    QuestionAnalysisReady {
        submission_url: String,
        question_number: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// One analysis stage finished (successfully or with an error result)
    StageCompleted {
        submission_url: String,
        question_number: u32,
        stage: Stage,
        errored: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// All five stages consolidated for a question
    AnalysisComplete {
        submission_url: String,
        question_number: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The submission's final result was persisted
    SubmissionFinalized {
        submission_url: String,
        total_questions: u32,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Final persistence failed after bounded retries; a manual retry can
    /// re-run the finalize step
    FinalizationFailed {
        submission_url: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A file session was cleaned (all dependents done, forced, or expired)
    SessionCleaned {
        session_id: String,
        expired: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AoEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            AoEvent::SubmissionReceived { .. } => "SubmissionReceived",
            AoEvent::QuestionAnalysisReady { .. } => "QuestionAnalysisReady",
            AoEvent::StageCompleted { .. } => "StageCompleted",
            AoEvent::AnalysisComplete { .. } => "AnalysisComplete",
            AoEvent::SubmissionFinalized { .. } => "SubmissionFinalized",
            AoEvent::FinalizationFailed { .. } => "FinalizationFailed",
            AoEvent::SessionCleaned { .. } => "SessionCleaned",
        }
    }
}

/// Broadcasts orchestration events to all connected SSE clients
#[derive(Clone)]
pub struct SseBroadcaster {
    tx: broadcast::Sender<AoEvent>,
}

impl SseBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Broadcast an event, ignoring if no clients are connected
    pub fn broadcast_lossy(&self, event: AoEvent) {
        if let Ok(count) = self.tx.send(event) {
            debug!("Broadcast event to {} clients", count);
        }
    }

    /// Current number of connected clients
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Subscribe directly to the event stream (used by tests and sweeps)
    pub fn subscribe(&self) -> broadcast::Receiver<AoEvent> {
        self.tx.subscribe()
    }

    fn subscribe_stream(&self) -> impl Stream<Item = Result<Event, Infallible>> {
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx);

        stream.filter_map(|result| async move {
            match result {
                Ok(ao_event) => {
                    let event = Event::default()
                        .event(ao_event.event_type())
                        .json_data(&ao_event)
                        .ok();
                    event.map(Ok)
                }
                Err(e) => {
                    warn!("SSE client lagged: {:?}", e);
                    None
                }
            }
        })
    }

    /// Handler body for GET /events
    pub fn handle_sse_connection(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        info!(
            "New SSE client connected, total clients: {}",
            self.client_count()
        );

        Sse::new(self.subscribe_stream()).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("keep-alive"),
        )
    }
}
