use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::platform;

/// Current policy file version
const POLICY_VERSION: &str = "1.0";

/// Days of usage history carried per app (oldest -> newest)
pub const USAGE_HISTORY_DAYS: usize = 7;

/// Per-app restriction settings held by the access policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MonitoredAppConfig {
    /// Unique application identifier
    pub app_id: String,

    /// Display name for overlay presentation (falls back to the app id)
    #[serde(default)]
    pub display_name: String,

    /// Opaque icon reference for the renderer
    #[serde(default)]
    pub icon_ref: String,

    /// Whether opening this app triggers the block overlay
    pub is_restricted: bool,

    /// Coins required for one temporary unlock
    pub unlock_cost: u32,

    /// Length of a purchased unlock in milliseconds
    pub unlock_duration_ms: i64,

    /// Motivational message shown on the block overlay
    #[serde(default)]
    pub message: String,

    /// Whether the motivational message is shown at all
    #[serde(default = "default_true")]
    pub show_message: bool,

    /// Minutes of use per day, oldest -> newest, always 7 entries
    #[serde(default)]
    pub usage_history: Vec<u32>,

    /// Times the user dismissed a block without paying. Maintained by the
    /// avoidance counter and re-merged on each snapshot, not by the UI.
    #[serde(default)]
    pub avoided_count: u32,
}

impl MonitoredAppConfig {
    /// Display name with app-id fallback.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.app_id
        } else {
            &self.display_name
        }
    }
}

/// One app entry in the configuration snapshot pushed by the UI collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AppSnapshotEntry {
    #[serde(default = "default_true")]
    pub restricted: bool,
    pub cost: u32,
    pub duration_ms: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_true")]
    pub show_message: bool,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub icon_ref: String,
    #[serde(default)]
    pub usage_history: Vec<u32>,
}

/// Full configuration snapshot message. Applied with full-replace semantics:
/// a new snapshot discards prior entries not present in it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigSnapshot {
    #[serde(default = "default_version")]
    pub version: String,

    /// Optional wallet seed; only honored for a never-persisted wallet
    #[serde(default)]
    pub wallet_coins: Option<u32>,

    pub apps: BTreeMap<String, AppSnapshotEntry>,
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

/// Persisted policy representation
#[derive(Debug, Clone, Deserialize, Serialize)]
struct PolicyFile {
    version: String,
    apps: BTreeMap<String, MonitoredAppConfig>,
}

/// Holds, per application identifier, whether it is restricted and its
/// unlock price, duration and message. Readers never observe a partially
/// applied snapshot: `replace_all` swaps the whole map at once.
pub struct AccessPolicy {
    apps: RwLock<Arc<BTreeMap<String, MonitoredAppConfig>>>,
    path: PathBuf,
}

impl AccessPolicy {
    /// Open the policy at the given path, loading the persisted snapshot if
    /// one exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let apps = match load_policy_file(&path)? {
            Some(file) => file.apps,
            None => BTreeMap::new(),
        };

        Ok(Self {
            apps: RwLock::new(Arc::new(apps)),
            path,
        })
    }

    /// Default policy location under the platform data directory.
    pub fn default_path() -> Result<PathBuf> {
        Ok(platform::paths::default_data_dir()?.join("policy.yaml"))
    }

    /// Whether the app requires payment to access.
    pub async fn is_restricted(&self, app_id: &str) -> bool {
        self.apps
            .read()
            .await
            .get(app_id)
            .map(|c| c.is_restricted)
            .unwrap_or(false)
    }

    /// Full settings for an app, if configured.
    pub async fn config_for(&self, app_id: &str) -> Option<MonitoredAppConfig> {
        self.apps.read().await.get(app_id).cloned()
    }

    /// Atomically replace the entire map. The new map is validated and
    /// persisted before the in-memory swap, so a failed write leaves the
    /// previous snapshot in effect.
    pub async fn replace_all(&self, apps: BTreeMap<String, MonitoredAppConfig>) -> Result<()> {
        validate_apps(&apps)?;
        persist_policy(&self.path, &apps)?;

        let mut guard = self.apps.write().await;
        *guard = Arc::new(apps);

        Ok(())
    }

    /// Current map contents.
    pub async fn all(&self) -> BTreeMap<String, MonitoredAppConfig> {
        (**self.apps.read().await).clone()
    }

    /// Number of configured apps.
    pub async fn len(&self) -> usize {
        self.apps.read().await.len()
    }

    /// Whether no apps are configured.
    pub async fn is_empty(&self) -> bool {
        self.apps.read().await.is_empty()
    }
}

/// Build the policy map from a snapshot message, folding in the avoided
/// counts maintained by the engine.
pub fn apps_from_snapshot(
    snapshot: &ConfigSnapshot,
    avoided_counts: &BTreeMap<String, u32>,
) -> BTreeMap<String, MonitoredAppConfig> {
    snapshot
        .apps
        .iter()
        .map(|(app_id, entry)| {
            let config = MonitoredAppConfig {
                app_id: app_id.clone(),
                display_name: entry.display_name.clone(),
                icon_ref: entry.icon_ref.clone(),
                is_restricted: entry.restricted,
                unlock_cost: entry.cost,
                unlock_duration_ms: entry.duration_ms,
                message: entry.message.clone(),
                show_message: entry.show_message,
                usage_history: normalize_history(&entry.usage_history),
                avoided_count: avoided_counts.get(app_id).copied().unwrap_or(0),
            };
            (app_id.clone(), config)
        })
        .collect()
}

/// Pad or truncate a usage history to exactly 7 entries, keeping the most
/// recent days and padding missing oldest days with zero.
pub fn normalize_history(history: &[u32]) -> Vec<u32> {
    let mut normalized = vec![0; USAGE_HISTORY_DAYS.saturating_sub(history.len())];
    let start = history.len().saturating_sub(USAGE_HISTORY_DAYS);
    normalized.extend_from_slice(&history[start..]);
    normalized
}

/// Compute a stable SHA-256 hash of a snapshot message, used to skip
/// re-applying an unchanged snapshot.
pub fn snapshot_hash(snapshot: &ConfigSnapshot) -> Result<String> {
    // BTreeMap keys serialize in a fixed order, so the hash is stable
    let canonical = serde_json::to_string(snapshot)?;

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();

    Ok(format!("sha256:{}", hex::encode(&result)))
}

// Helper module for hex encoding
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Validate a snapshot message before it is converted and applied.
pub fn validate_snapshot(snapshot: &ConfigSnapshot) -> Result<()> {
    for (app_id, entry) in &snapshot.apps {
        if app_id.is_empty() {
            return Err(EngineError::InvalidSnapshot(
                "app id cannot be empty".to_string(),
            ));
        }

        if entry.duration_ms <= 0 {
            return Err(EngineError::InvalidSnapshot(format!(
                "unlock duration for '{}' must be positive, got {}",
                app_id, entry.duration_ms
            )));
        }
    }

    Ok(())
}

fn validate_apps(apps: &BTreeMap<String, MonitoredAppConfig>) -> Result<()> {
    for (app_id, config) in apps {
        if app_id.is_empty() || config.app_id.is_empty() {
            return Err(EngineError::InvalidSnapshot(
                "app id cannot be empty".to_string(),
            ));
        }

        if config.app_id != *app_id {
            return Err(EngineError::InvalidSnapshot(format!(
                "map key '{}' does not match app id '{}'",
                app_id, config.app_id
            )));
        }

        if config.unlock_duration_ms <= 0 {
            return Err(EngineError::InvalidSnapshot(format!(
                "unlock duration for '{}' must be positive, got {}",
                app_id, config.unlock_duration_ms
            )));
        }

        if config.usage_history.len() != USAGE_HISTORY_DAYS {
            return Err(EngineError::InvalidSnapshot(format!(
                "usage history for '{}' must have {} entries, got {}",
                app_id,
                USAGE_HISTORY_DAYS,
                config.usage_history.len()
            )));
        }
    }

    Ok(())
}

fn load_policy_file(path: &Path) -> Result<Option<PolicyFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let file: PolicyFile = serde_yaml::from_str(&content)?;

    if file.version != POLICY_VERSION {
        tracing::warn!(
            "Policy file version mismatch (expected {}, got {}). Starting empty.",
            POLICY_VERSION,
            file.version
        );
        return Ok(None);
    }

    validate_apps(&file.apps)?;

    Ok(Some(file))
}

fn persist_policy(path: &Path, apps: &BTreeMap<String, MonitoredAppConfig>) -> Result<()> {
    let file = PolicyFile {
        version: POLICY_VERSION.to_string(),
        apps: apps.clone(),
    };
    let content =
        serde_yaml::to_string(&file).map_err(|e| EngineError::persistence("policy", e))?;

    platform::common::atomic_write(path, content.as_bytes())
        .map_err(|e| EngineError::persistence("policy", e))
}
