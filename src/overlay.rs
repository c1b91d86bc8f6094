use crate::error::Result;
use crate::policy::MonitoredAppConfig;

/// Everything the block screen presents for one restricted app. The engine
/// computes the values; rendering belongs to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayContent {
    pub app_id: String,
    pub display_name: String,
    pub icon_ref: String,

    /// Motivational message, present only when enabled and non-empty
    pub message: Option<String>,

    pub unlock_cost: u32,
    pub unlock_duration_ms: i64,

    /// Minutes of use per day, oldest -> newest
    pub usage_history: Vec<u32>,
    pub today_minutes: u32,
    pub daily_average_minutes: u32,
}

impl OverlayContent {
    pub fn for_app(config: &MonitoredAppConfig) -> Self {
        let today_minutes = config.usage_history.last().copied().unwrap_or(0);
        let daily_average_minutes = if config.usage_history.is_empty() {
            0
        } else {
            config.usage_history.iter().sum::<u32>() / config.usage_history.len() as u32
        };

        let message = if config.show_message && !config.message.is_empty() {
            Some(config.message.clone())
        } else {
            None
        };

        Self {
            app_id: config.app_id.clone(),
            display_name: config.label().to_string(),
            icon_ref: config.icon_ref.clone(),
            message,
            unlock_cost: config.unlock_cost,
            unlock_duration_ms: config.unlock_duration_ms,
            usage_history: config.usage_history.clone(),
            today_minutes,
            daily_average_minutes,
        }
    }
}

/// Boundary to the host's overlay drawing capability. The engine decides
/// when the block screen and the per-app countdown indicators appear;
/// drawing them is the host's concern.
///
/// `show_block` must behave as attach-or-refresh: called while a block is
/// already visible it updates the content for the new app rather than
/// failing. `upsert_countdown` likewise creates the indicator on first call
/// and updates it afterwards.
pub trait OverlayRenderer: Send + Sync {
    /// Attach the block screen, or refresh its content if already attached.
    fn show_block(&self, content: &OverlayContent) -> Result<()>;

    /// Detach the block screen. A no-op when not attached.
    fn hide_block(&self) -> Result<()>;

    /// Create or update the remaining-time indicator for an app.
    fn upsert_countdown(&self, app_id: &str, remaining_ms: i64) -> Result<()>;

    /// Remove the remaining-time indicator for an app. A no-op when absent.
    fn remove_countdown(&self, app_id: &str) -> Result<()>;
}
