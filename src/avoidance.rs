use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::platform;

/// Current avoidance file version
const AVOIDANCE_VERSION: &str = "1.0";

/// Persisted avoidance counts
#[derive(Debug, Clone, Deserialize, Serialize)]
struct AvoidanceFile {
    version: String,
    /// app id -> times the user dismissed a block without paying
    counts: BTreeMap<String, u32>,
}

/// Persisted, monotonically increasing per-app counter of voluntary block
/// dismissals. The engine only ever increments; the configuration and
/// telemetry collaborators read the counts.
pub struct AvoidanceCounter {
    counts: Mutex<BTreeMap<String, u32>>,
    path: PathBuf,
}

impl AvoidanceCounter {
    /// Open the counter at the given path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let counts = match load_avoidance_file(&path)? {
            Some(file) => file.counts,
            None => BTreeMap::new(),
        };

        Ok(Self {
            counts: Mutex::new(counts),
            path,
        })
    }

    /// Default counter location under the platform data directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(platform::paths::default_data_dir()?.join("avoidance.json"))
    }

    /// Record one avoided launch for the app.
    pub async fn increment(&self, app_id: &str) -> Result<u32> {
        let mut counts = self.counts.lock().await;

        let mut next = counts.clone();
        let count = next.entry(app_id.to_string()).or_insert(0);
        *count += 1;
        let new_count = *count;

        persist_counts(&self.path, &next)?;
        *counts = next;

        debug!("Avoided count for {} is now {}", app_id, new_count);
        Ok(new_count)
    }

    /// Current count for an app (zero when never avoided).
    pub async fn count(&self, app_id: &str) -> u32 {
        self.counts.lock().await.get(app_id).copied().unwrap_or(0)
    }

    /// All counts, keyed by app id.
    pub async fn all(&self) -> BTreeMap<String, u32> {
        self.counts.lock().await.clone()
    }
}

fn load_avoidance_file(path: &Path) -> Result<Option<AvoidanceFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let file: AvoidanceFile = serde_json::from_str(&content)?;

    if file.version != AVOIDANCE_VERSION {
        tracing::warn!(
            "Avoidance file version mismatch (expected {}, got {}). Starting empty.",
            AVOIDANCE_VERSION,
            file.version
        );
        return Ok(None);
    }

    Ok(Some(file))
}

fn persist_counts(path: &Path, counts: &BTreeMap<String, u32>) -> Result<()> {
    let file = AvoidanceFile {
        version: AVOIDANCE_VERSION.to_string(),
        counts: counts.clone(),
    };
    let content = serde_json::to_string_pretty(&file)
        .map_err(|e| EngineError::persistence("avoidance", e))?;

    platform::common::atomic_write(path, content.as_bytes())
        .map_err(|e| EngineError::persistence("avoidance", e))
}
