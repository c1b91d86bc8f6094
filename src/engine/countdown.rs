use tracing::{info, warn};

use super::{EngineShared, monitor};
use crate::error::Result;

/// One pass of the countdown manager at `now_ms`.
///
/// Runs on its own, coarser cadence than the watcher loop. Live sessions get
/// their remaining-time indicator refreshed; expired sessions are swept from
/// the store and their indicator removed. When the expired app is the
/// current or last-checked foreground app, the blocking state machine is
/// re-evaluated immediately instead of waiting for the next natural poll,
/// closing the window of unrestricted access after expiry.
pub(crate) async fn countdown_tick(shared: &EngineShared, now_ms: i64) -> Result<()> {
    for session in shared.sessions.all().await {
        let remaining = session.expires_at_ms - now_ms;
        if remaining > 0 {
            if let Err(err) = shared.renderer.upsert_countdown(&session.app_id, remaining) {
                warn!("Failed to update countdown for {}: {}", session.app_id, err);
            }
        }
    }

    let expired = shared.sessions.sweep_expired(now_ms).await?;
    for app_id in expired {
        if let Err(err) = shared.renderer.remove_countdown(&app_id) {
            warn!("Failed to remove countdown for {}: {}", app_id, err);
        }
        info!("Unlock session for {} expired", app_id);

        let needs_recheck = {
            let state = shared.state.lock().await;
            state.current_foreground.as_deref() == Some(app_id.as_str())
                || state.last_checked.as_deref() == Some(app_id.as_str())
        };

        if needs_recheck {
            monitor::monitor_tick(shared, now_ms).await?;
        }
    }

    Ok(())
}
