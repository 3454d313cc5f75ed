//! Application state shared across handlers.

use crate::aggregator::SubmissionAggregator;
use crate::bus::BusClient;
use crate::coordinator::AnalysisCoordinator;
use crate::file_sessions::FileSessionManager;
use crate::intake::IntakeService;
use crate::orchestrator::AnalysisOrchestrator;
use crate::results_store::ResultsStore;
use crate::services::{
    AnalyzerSet, AudioTranscoder, FfmpegTranscoder, HttpSpeechToText, SpeechToText,
};
use crate::sse::SseBroadcaster;
use seab_common::config::OrchestratorConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// External collaborator handles. Production builds them from configuration;
/// tests hand in stubs.
pub struct Collaborators {
    pub transcoder: Arc<dyn AudioTranscoder>,
    pub speech_to_text: Arc<dyn SpeechToText>,
    pub analyzers: AnalyzerSet,
}

impl Collaborators {
    pub fn from_config(config: &OrchestratorConfig) -> anyhow::Result<Self> {
        Ok(Self {
            transcoder: Arc::new(FfmpegTranscoder::new()?),
            speech_to_text: Arc::new(HttpSpeechToText::new(
                config.analysis.speech_to_text_url.clone(),
                config.analysis.timeout_secs,
            )?),
            analyzers: AnalyzerSet::from_config(&config.analysis)?,
        })
    }
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<OrchestratorConfig>,
    pub bus: Arc<BusClient>,
    pub results: Arc<ResultsStore>,
    pub file_sessions: Arc<FileSessionManager>,
    pub coordinator: Arc<AnalysisCoordinator>,
    pub orchestrator: AnalysisOrchestrator,
    pub aggregator: Arc<SubmissionAggregator>,
    pub intake: Arc<IntakeService>,
    pub sse: SseBroadcaster,
}

impl AppState {
    /// Wire every component together. The bus is injected so tests can
    /// substitute a capturing transport.
    pub fn assemble(
        db: SqlitePool,
        config: OrchestratorConfig,
        bus: Arc<BusClient>,
        collaborators: Collaborators,
    ) -> Self {
        let config = Arc::new(config);
        let sse = SseBroadcaster::new(256);
        let results = Arc::new(ResultsStore::new());
        let file_sessions = Arc::new(FileSessionManager::new());

        let coordinator = Arc::new(AnalysisCoordinator::new(Arc::clone(&bus), sse.clone()));
        let orchestrator = AnalysisOrchestrator::new(
            Arc::clone(&bus),
            sse.clone(),
            Arc::clone(&file_sessions),
            Arc::clone(&results),
            collaborators.analyzers,
            Duration::from_secs(config.analysis.timeout_secs),
            config.analysis.fluency_uses_audio,
        );
        let aggregator = Arc::new(SubmissionAggregator::new(
            Arc::clone(&results),
            db.clone(),
            Arc::clone(&bus),
            sse.clone(),
        ));
        let intake = Arc::new(IntakeService::new(
            Arc::clone(&bus),
            sse.clone(),
            Arc::clone(&file_sessions),
            collaborators.transcoder,
            collaborators.speech_to_text,
            config.work_dir.clone(),
            config.sessions.cleanup_timeout_minutes,
            config.analysis.fluency_uses_audio,
        ));

        Self {
            db,
            config,
            bus,
            results,
            file_sessions,
            coordinator,
            orchestrator,
            aggregator,
            intake,
            sse,
        }
    }
}
