use tracing::{debug, error, info, warn};

use super::EngineShared;
use crate::error::{EngineError, Result};
use crate::overlay::OverlayContent;

/// Blocking state for the engine. Exactly one live instance exists; the
/// overlay is visible only while in `Blocking` for the foreground app with
/// no active unlock session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockState {
    /// Foreground app is unrestricted (or unknown)
    Idle,
    /// A restricted app is foregrounded without an active session
    Blocking(String),
    /// A restricted app is foregrounded under an active unlock session
    Unlocked(String),
}

impl BlockState {
    /// The restricted app currently being blocked, if any.
    pub fn blocked_app(&self) -> Option<&str> {
        match self {
            BlockState::Blocking(app_id) => Some(app_id),
            _ => None,
        }
    }
}

/// Mutable per-tick state owned by the monitor loop.
#[derive(Debug)]
pub(crate) struct MonitorState {
    pub(crate) block: BlockState,
    pub(crate) overlay_visible: bool,
    pub(crate) was_unlocked_during_block: bool,
    pub(crate) current_foreground: Option<String>,
    pub(crate) last_checked: Option<String>,
}

impl Default for MonitorState {
    fn default() -> Self {
        Self {
            block: BlockState::Idle,
            overlay_visible: false,
            was_unlocked_during_block: false,
            current_foreground: None,
            last_checked: None,
        }
    }
}

impl MonitorState {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One evaluation of the blocking state machine at `now_ms`.
///
/// Failures inside a tick never propagate out of the scheduling loop; a
/// store or renderer error affects at most this tick.
pub(crate) async fn monitor_tick(shared: &EngineShared, now_ms: i64) -> Result<()> {
    let current = shared.watcher.lock().await.poll(now_ms);

    let Some(current) = current else {
        // Nothing qualifies as foreground; leave everything as is
        return Ok(());
    };

    let mut state = shared.state.lock().await;
    state.current_foreground = Some(current.clone());
    state.last_checked = Some(current.clone());

    if !shared.policy.is_restricted(&current).await {
        leave_restricted(shared, &mut state).await;
        return Ok(());
    }

    let session = shared.sessions.get(&current).await;
    let session_live = session
        .as_ref()
        .map(|s| s.expires_at_ms > now_ms)
        .unwrap_or(false);

    if session_live {
        enter_unlocked(shared, &mut state, &current);
        return Ok(());
    }

    if session.is_some() {
        // Session just expired; drop it and its indicator before re-blocking
        if let Err(err) = shared.sessions.remove(&current).await {
            error!("Failed to remove expired session for {}: {}", current, err);
        }
        if let Err(err) = shared.renderer.remove_countdown(&current) {
            warn!("Failed to remove countdown for {}: {}", current, err);
        }
        info!("Unlock session for {} expired", current);
    }

    enter_blocking(shared, &mut state, &current).await;
    Ok(())
}

/// The foreground app is not restricted: hide any block and return to Idle.
/// A completed show -> hide cycle with no successful unlock counts as one
/// avoided launch.
async fn leave_restricted(shared: &EngineShared, state: &mut MonitorState) {
    let previous = std::mem::replace(&mut state.block, BlockState::Idle);

    if let BlockState::Blocking(app_id) = previous {
        if state.overlay_visible {
            if let Err(err) = shared.renderer.hide_block() {
                warn!("Failed to detach overlay: {}", err);
            }
            state.overlay_visible = false;

            if !state.was_unlocked_during_block {
                info!("Block avoided for {}", app_id);
                if let Err(err) = shared.avoidance.increment(&app_id).await {
                    error!("Failed to persist avoided count for {}: {}", app_id, err);
                }
            }
        }
        state.was_unlocked_during_block = false;
    }
}

/// The foreground app holds a live unlock session: overlay stays hidden.
fn enter_unlocked(shared: &EngineShared, state: &mut MonitorState, app_id: &str) {
    if state.block == BlockState::Unlocked(app_id.to_string()) {
        return;
    }

    if state.overlay_visible {
        if let Err(err) = shared.renderer.hide_block() {
            warn!("Failed to detach overlay: {}", err);
        }
        state.overlay_visible = false;
    }

    debug!("{} has an active unlock session", app_id);
    state.block = BlockState::Unlocked(app_id.to_string());
}

/// The foreground app is restricted with no live session: show the block.
/// The logical state is recorded even when the visual attach fails, and the
/// attach is retried on the next tick.
async fn enter_blocking(shared: &EngineShared, state: &mut MonitorState, app_id: &str) {
    let already_visible = state.overlay_visible
        && matches!(&state.block, BlockState::Blocking(b) if b.as_str() == app_id);
    if already_visible {
        return;
    }

    state.was_unlocked_during_block = false;

    let Some(config) = shared.policy.config_for(app_id).await else {
        // Snapshot was swapped between the restriction check and here
        return;
    };

    let content = OverlayContent::for_app(&config);
    match shared.renderer.show_block(&content) {
        Ok(()) => {
            state.overlay_visible = true;
            info!("Blocking {}", app_id);
        }
        Err(err) => {
            state.overlay_visible = false;
            warn!("Overlay attach failed for {}, will retry: {}", app_id, err);
        }
    }

    state.block = BlockState::Blocking(app_id.to_string());
}

/// Pay for and grant a temporary unlock of `app_id` at `now_ms`.
///
/// Debits the unlock cost, creates the session, hides the overlay and
/// transitions to `Unlocked`. On `InsufficientFunds` nothing is mutated. A
/// session write failure refunds the debit so the ledger never pays for an
/// unlock that was not granted.
pub(crate) async fn request_unlock(
    shared: &EngineShared,
    app_id: &str,
    now_ms: i64,
) -> Result<i64> {
    let config = shared
        .policy
        .config_for(app_id)
        .await
        .filter(|c| c.is_restricted)
        .ok_or_else(|| EngineError::UnknownApp(app_id.to_string()))?;

    if config.unlock_cost > 0 {
        shared.wallet.debit(config.unlock_cost).await?;
    }

    let expires_at_ms = match shared
        .sessions
        .create(app_id, config.unlock_duration_ms, now_ms)
        .await
    {
        Ok(expires_at_ms) => expires_at_ms,
        Err(err) => {
            if config.unlock_cost > 0 {
                if let Err(refund_err) = shared.wallet.credit(config.unlock_cost).await {
                    error!(
                        "Failed to refund {} coins after session write failure: {}",
                        config.unlock_cost, refund_err
                    );
                }
            }
            return Err(err);
        }
    };

    {
        let mut state = shared.state.lock().await;

        if matches!(&state.block, BlockState::Blocking(b) if b.as_str() == app_id) {
            state.was_unlocked_during_block = true;
        }

        if state.overlay_visible {
            if let Err(err) = shared.renderer.hide_block() {
                warn!("Failed to detach overlay: {}", err);
            }
            state.overlay_visible = false;
        }

        state.block = BlockState::Unlocked(app_id.to_string());
    }

    if let Err(err) = shared
        .renderer
        .upsert_countdown(app_id, expires_at_ms - now_ms)
    {
        warn!("Failed to show countdown for {}: {}", app_id, err);
    }

    info!(
        "Unlocked {} for {} ms ({} coins)",
        app_id, config.unlock_duration_ms, config.unlock_cost
    );
    Ok(expires_at_ms)
}
