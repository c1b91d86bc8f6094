use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::platform;

/// Current engine state version
const ENGINE_STATE_VERSION: &str = "1.0";

/// Engine-level persisted record: install identity plus bookkeeping for the
/// last applied configuration snapshot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineState {
    /// State version
    pub version: String,

    /// Unique identifier for this installation
    pub install_id: String,

    /// Last time the monitoring loops were started
    pub last_started: Option<DateTime<Utc>>,

    /// Last time a configuration snapshot was applied
    pub last_snapshot_applied: Option<DateTime<Utc>>,

    /// Hash of the last applied configuration snapshot
    pub snapshot_hash: Option<String>,
}

impl EngineState {
    /// Create a new engine state with a fresh install id.
    pub fn new() -> Self {
        Self {
            version: ENGINE_STATE_VERSION.to_string(),
            install_id: Uuid::new_v4().to_string(),
            last_started: None,
            last_snapshot_applied: None,
            snapshot_hash: None,
        }
    }

    /// Load engine state from file.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        let state: EngineState = serde_json::from_str(&content)?;

        if state.version != ENGINE_STATE_VERSION {
            tracing::warn!(
                "Engine state version mismatch (expected {}, got {}). Treating as new state.",
                ENGINE_STATE_VERSION,
                state.version
            );
            return Ok(None);
        }

        Ok(Some(state))
    }

    /// Save engine state to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::persistence("engine state", e))?;

        platform::common::atomic_write(path, content.as_bytes())
            .map_err(|e| EngineError::persistence("engine state", e))
    }

    /// Record a loop start.
    pub fn update_started(&mut self) {
        self.last_started = Some(Utc::now());
    }

    /// Record an applied snapshot.
    pub fn update_snapshot_applied(&mut self, hash: String) {
        self.snapshot_hash = Some(hash);
        self.last_snapshot_applied = Some(Utc::now());
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Default engine state location under the platform data directory.
pub fn default_engine_state_path() -> Result<PathBuf> {
    Ok(platform::paths::default_data_dir()?.join("engine-state.json"))
}
