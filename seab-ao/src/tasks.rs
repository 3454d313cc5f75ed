//! Background sweeps.
//!
//! A coarse timer reclaims expired file sessions and purges stale
//! coordination and analysis states. The sweep cancels no in-flight work;
//! it only drops state and files whose lifetime has elapsed.

use crate::sse::AoEvent;
use crate::state::AppState;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};

/// Spawn the periodic cleanup task.
pub fn start_sweeps(state: AppState) {
    let interval = Duration::from_secs(state.config.sessions.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_sweep(&state).await;
        }
    });
}

/// One sweep pass. Also reachable from the debug surface.
pub async fn run_sweep(state: &AppState) {
    let cleaned = state.file_sessions.periodic_cleanup().await;
    for session_id in &cleaned {
        state.sse.broadcast_lossy(AoEvent::SessionCleaned {
            session_id: session_id.clone(),
            expired: true,
            timestamp: Utc::now(),
        });
    }

    let ttl = state.config.sessions.coordination_ttl_minutes;
    let purged_coordination = state.coordinator.purge_older_than(ttl).await;
    let purged_analysis = state.orchestrator.purge_older_than(ttl).await;

    if !cleaned.is_empty() || purged_coordination > 0 || purged_analysis > 0 {
        info!(
            expired_sessions = cleaned.len(),
            purged_coordination,
            purged_analysis,
            "Sweep reclaimed state"
        );
    } else {
        debug!("Sweep found nothing to reclaim");
    }
}
