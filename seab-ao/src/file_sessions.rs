//! File session manager.
//!
//! Tracks every transcoded audio file between conversion and the moment the
//! last dependent service reports completion, then deletes it exactly once.
//! Cleanup also fires on timeout (periodic sweep) or on operator request.
//! Filesystem errors during deletion are logged and swallowed; the session
//! is still marked complete to prevent retry storms.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Default minutes a session may live before the sweep reclaims its file.
pub const DEFAULT_CLEANUP_TIMEOUT_MINUTES: f64 = 30.0;

/// Registration failures. Both leave existing state untouched.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already registered: {0}")]
    AlreadyRegistered(String),

    #[error("file does not exist: {0}")]
    FileMissing(PathBuf),
}

#[derive(Debug, Clone)]
struct FileSession {
    file_path: PathBuf,
    created_at: DateTime<Utc>,
    cleanup_deadline: DateTime<Utc>,
    dependencies: HashSet<String>,
    cleanup_completed: bool,
}

/// Observability snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    pub cleanup_deadline: DateTime<Utc>,
    pub dependencies: Vec<String>,
    pub cleanup_completed: bool,
}

/// Centralized file lifecycle management.
pub struct FileSessionManager {
    sessions: Mutex<HashMap<String, FileSession>>,
    counter: AtomicU64,
}

impl FileSessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Unique session id derived from the question key plus a monotonic
    /// counter, the current timestamp, and a random suffix, so retries of
    /// the same question always produce different sessions.
    pub fn generate_session_id(&self, submission_url: &str, question_number: u32) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        submission_url.hash(&mut hasher);
        let key_hash = hasher.finish() & 0xffff_ffff;

        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let timestamp = Utc::now().timestamp();
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        format!(
            "sess-{key_hash:08x}-{question_number}-{counter}-{timestamp}-{}",
            &suffix[..8]
        )
    }

    /// Record a session. The file must already exist; a second registration
    /// with the same id is rejected and leaves the first intact.
    pub async fn register(
        &self,
        session_id: &str,
        file_path: &Path,
        dependencies: HashSet<String>,
        cleanup_timeout_minutes: f64,
    ) -> Result<(), SessionError> {
        if !file_path.exists() {
            return Err(SessionError::FileMissing(file_path.to_path_buf()));
        }

        let now = Utc::now();
        let timeout_secs = (cleanup_timeout_minutes * 60.0).max(0.0) as i64;
        let session = FileSession {
            file_path: file_path.to_path_buf(),
            created_at: now,
            cleanup_deadline: now + ChronoDuration::seconds(timeout_secs),
            dependencies: dependencies.clone(),
            cleanup_completed: false,
        };

        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session_id) {
            error!(session_id = %session_id, "Rejected duplicate session registration");
            return Err(SessionError::AlreadyRegistered(session_id.to_string()));
        }
        sessions.insert(session_id.to_string(), session);
        drop(sessions);

        info!(
            session_id = %session_id,
            file = %file_path.display(),
            dependencies = ?dependencies,
            "Registered file session"
        );
        Ok(())
    }

    /// Remove one service from the pending dependency set; when the set
    /// becomes empty the file is deleted and the session latched complete.
    ///
    /// Unknown sessions return `false` and never raise; a late completion
    /// after the sweep already reclaimed the file is normal.
    pub async fn mark_service_complete(&self, session_id: &str, service_name: &str) -> bool {
        let pending_delete;
        {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(session_id) else {
                warn!(
                    session_id = %session_id,
                    service = %service_name,
                    "Completion for unknown session"
                );
                return false;
            };

            if session.cleanup_completed {
                return false;
            }

            session.dependencies.remove(service_name);
            info!(
                session_id = %session_id,
                service = %service_name,
                remaining = ?session.dependencies,
                "Service completed for session"
            );

            if !session.dependencies.is_empty() {
                return true;
            }
            session.cleanup_completed = true;
            pending_delete = session.file_path.clone();
        }

        // File deletion happens outside the index lock.
        delete_file(session_id, &pending_delete);
        true
    }

    /// Terminal cleanup regardless of pending dependencies. Returns whether
    /// a live session was cleaned.
    pub async fn force_cleanup(&self, session_id: &str) -> bool {
        let pending_delete;
        {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.get_mut(session_id) else {
                return false;
            };
            if session.cleanup_completed {
                return false;
            }
            session.cleanup_completed = true;
            session.dependencies.clear();
            pending_delete = session.file_path.clone();
        }

        delete_file(session_id, &pending_delete);
        info!(session_id = %session_id, "Forced session cleanup");
        true
    }

    /// Force-clean every session whose deadline has elapsed. Returns the
    /// ids that were cleaned. Intended to run on a coarse timer.
    pub async fn periodic_cleanup(&self) -> Vec<String> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, session)| !session.cleanup_completed && now > session.cleanup_deadline)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut cleaned = Vec::with_capacity(expired.len());
        for session_id in expired {
            warn!(session_id = %session_id, "Session expired, forcing cleanup");
            if self.force_cleanup(&session_id).await {
                cleaned.push(session_id);
            }
        }
        cleaned
    }

    /// Snapshot of one session, completed or not.
    pub async fn get_session_info(&self, session_id: &str) -> Option<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|session| snapshot(session_id, session))
    }

    /// Snapshots of all sessions still awaiting cleanup.
    pub async fn get_active_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .filter(|(_, session)| !session.cleanup_completed)
            .map(|(id, session)| snapshot(id, session))
            .collect()
    }
}

impl Default for FileSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(session_id: &str, session: &FileSession) -> SessionInfo {
    let mut dependencies: Vec<String> = session.dependencies.iter().cloned().collect();
    dependencies.sort();
    SessionInfo {
        session_id: session_id.to_string(),
        file_path: session.file_path.display().to_string(),
        created_at: session.created_at,
        cleanup_deadline: session.cleanup_deadline,
        dependencies,
        cleanup_completed: session.cleanup_completed,
    }
}

fn delete_file(session_id: &str, path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(session_id = %session_id, file = %path.display(), "Cleaned up file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(session_id = %session_id, file = %path.display(), "File already gone at cleanup");
        }
        Err(e) => {
            // Swallowed: the session stays complete so redelivery cannot
            // trigger a retry storm against a bad filesystem.
            error!(
                session_id = %session_id,
                file = %path.display(),
                error = %e,
                "Failed to delete session file"
            );
        }
    }
}
