use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::platform;

/// Current sessions file version
const SESSIONS_VERSION: &str = "1.0";

/// A time-boxed grant of access to a restricted app after a successful
/// payment. At most one session exists per app id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UnlockSession {
    pub app_id: String,
    pub expires_at_ms: i64,
}

/// Persisted sessions representation
#[derive(Debug, Clone, Deserialize, Serialize)]
struct SessionsFile {
    version: String,
    /// app id -> expiry in epoch milliseconds
    sessions: BTreeMap<String, i64>,
}

/// Tracks which restricted apps currently hold an active, time-boxed unlock
/// and when each expires. Survives process restarts; on open, sessions
/// already expired by wall clock are dropped before the first tick runs,
/// since in-memory timers do not survive process death.
pub struct UnlockSessionStore {
    sessions: Mutex<BTreeMap<String, i64>>,
    path: PathBuf,
}

impl UnlockSessionStore {
    /// Open the store at the given path, reconciling persisted expiries
    /// against the wall clock.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut sessions = match load_sessions_file(&path)? {
            Some(file) => file.sessions,
            None => BTreeMap::new(),
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let before = sessions.len();
        sessions.retain(|_, expires_at_ms| *expires_at_ms > now_ms);

        let dropped = before - sessions.len();
        if dropped > 0 {
            info!("Dropped {} unlock session(s) expired while stopped", dropped);
            persist_sessions(&path, &sessions)?;
        }

        Ok(Self {
            sessions: Mutex::new(sessions),
            path,
        })
    }

    /// Default sessions location under the platform data directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(platform::paths::default_data_dir()?.join("sessions.json"))
    }

    /// Create a session for the app, expiring `duration_ms` after `now_ms`.
    /// Overwrites any existing session for the same app; durations never
    /// stack. Returns the expiry timestamp.
    pub async fn create(&self, app_id: &str, duration_ms: i64, now_ms: i64) -> Result<i64> {
        let expires_at_ms = now_ms + duration_ms;

        let mut sessions = self.sessions.lock().await;
        let mut next = sessions.clone();
        next.insert(app_id.to_string(), expires_at_ms);

        persist_sessions(&self.path, &next)?;
        *sessions = next;

        debug!("Unlock session for {} expires at {}", app_id, expires_at_ms);
        Ok(expires_at_ms)
    }

    /// Get the session for an app, expired or not.
    pub async fn get(&self, app_id: &str) -> Option<UnlockSession> {
        self.sessions
            .lock()
            .await
            .get(app_id)
            .map(|&expires_at_ms| UnlockSession {
                app_id: app_id.to_string(),
                expires_at_ms,
            })
    }

    /// Remove the session for an app, if present.
    pub async fn remove(&self, app_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if !sessions.contains_key(app_id) {
            return Ok(());
        }

        let mut next = sessions.clone();
        next.remove(app_id);

        persist_sessions(&self.path, &next)?;
        *sessions = next;

        Ok(())
    }

    /// Remove and return all sessions whose expiry is at or before `now_ms`.
    pub async fn sweep_expired(&self, now_ms: i64) -> Result<Vec<String>> {
        let mut sessions = self.sessions.lock().await;

        let expired: Vec<String> = sessions
            .iter()
            .filter(|&(_, &expires_at_ms)| expires_at_ms <= now_ms)
            .map(|(app_id, _)| app_id.clone())
            .collect();

        if expired.is_empty() {
            return Ok(expired);
        }

        let mut next = sessions.clone();
        for app_id in &expired {
            next.remove(app_id);
        }

        persist_sessions(&self.path, &next)?;
        *sessions = next;

        Ok(expired)
    }

    /// All current sessions, expired or not.
    pub async fn all(&self) -> Vec<UnlockSession> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|(app_id, &expires_at_ms)| UnlockSession {
                app_id: app_id.clone(),
                expires_at_ms,
            })
            .collect()
    }
}

fn load_sessions_file(path: &Path) -> Result<Option<SessionsFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let file: SessionsFile = serde_json::from_str(&content)?;

    if file.version != SESSIONS_VERSION {
        tracing::warn!(
            "Sessions file version mismatch (expected {}, got {}). Starting empty.",
            SESSIONS_VERSION,
            file.version
        );
        return Ok(None);
    }

    Ok(Some(file))
}

fn persist_sessions(path: &Path, sessions: &BTreeMap<String, i64>) -> Result<()> {
    let file = SessionsFile {
        version: SESSIONS_VERSION.to_string(),
        sessions: sessions.clone(),
    };
    let content = serde_json::to_string_pretty(&file)
        .map_err(|e| EngineError::persistence("sessions", e))?;

    platform::common::atomic_write(path, content.as_bytes())
        .map_err(|e| EngineError::persistence("sessions", e))
}
