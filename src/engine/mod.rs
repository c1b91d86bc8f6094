// Monitoring engine: the blocking state machine, its two scheduling loops,
// and the control surface exposed to the host application.

mod countdown;
mod monitor;
mod state;

pub use monitor::BlockState;
pub use state::EngineState;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::avoidance::AvoidanceCounter;
use crate::error::{EngineError, Result};
use crate::overlay::OverlayRenderer;
use crate::policy::{self, AccessPolicy, ConfigSnapshot};
use crate::session::{UnlockSession, UnlockSessionStore};
use crate::wallet::WalletLedger;
use crate::watcher::{ForegroundSource, ForegroundWatcher};

use monitor::MonitorState;

/// Default watcher + state machine cadence
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default countdown manager cadence
pub const DEFAULT_COUNTDOWN_INTERVAL: Duration = Duration::from_secs(1);

/// Construction options for the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// The engine's own application identifier, excluded from foreground
    /// results so the overlay cannot block itself
    pub own_app_id: String,

    /// Directory for persisted stores; platform default when absent
    pub data_dir: Option<PathBuf>,

    /// Watcher + state machine cadence
    pub poll_interval: Duration,

    /// Countdown manager cadence
    pub countdown_interval: Duration,
}

impl EngineOptions {
    pub fn new(own_app_id: impl Into<String>) -> Self {
        Self {
            own_app_id: own_app_id.into(),
            data_dir: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            countdown_interval: DEFAULT_COUNTDOWN_INTERVAL,
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }
}

/// State shared between the two scheduling loops and the control surface.
pub(crate) struct EngineShared {
    pub(crate) policy: AccessPolicy,
    pub(crate) wallet: WalletLedger,
    pub(crate) sessions: UnlockSessionStore,
    pub(crate) avoidance: AvoidanceCounter,
    pub(crate) watcher: Mutex<ForegroundWatcher>,
    pub(crate) renderer: Arc<dyn OverlayRenderer>,
    pub(crate) state: Mutex<MonitorState>,
}

/// The monitoring-and-gating engine.
///
/// Owns the foreground watcher, the blocking state machine, the unlock
/// ledger and the countdown manager. `start` spawns two timer-driven loops
/// on the runtime; `stop` halts them and clears transient overlay state
/// while leaving every persisted store intact for the next start.
pub struct MonitorEngine {
    shared: Arc<EngineShared>,
    engine_state: Mutex<EngineState>,
    engine_state_path: PathBuf,
    running: Arc<Mutex<bool>>,
    poll_interval: Duration,
    countdown_interval: Duration,
}

impl MonitorEngine {
    /// Open the engine, loading all persisted stores and reconciling
    /// session expiry against the wall clock.
    pub fn open(
        options: EngineOptions,
        source: Arc<dyn ForegroundSource>,
        renderer: Arc<dyn OverlayRenderer>,
    ) -> Result<Self> {
        let (policy_path, wallet_path, sessions_path, avoidance_path, engine_state_path) =
            match &options.data_dir {
                Some(dir) => (
                    dir.join("policy.yaml"),
                    dir.join("wallet.json"),
                    dir.join("sessions.json"),
                    dir.join("avoidance.json"),
                    dir.join("engine-state.json"),
                ),
                None => (
                    AccessPolicy::default_path()?,
                    WalletLedger::default_path()?,
                    UnlockSessionStore::default_path()?,
                    AvoidanceCounter::default_path()?,
                    state::default_engine_state_path()?,
                ),
            };

        let shared = EngineShared {
            policy: AccessPolicy::open(policy_path)?,
            wallet: WalletLedger::open(wallet_path)?,
            sessions: UnlockSessionStore::open(sessions_path)?,
            avoidance: AvoidanceCounter::open(avoidance_path)?,
            watcher: Mutex::new(ForegroundWatcher::new(source, options.own_app_id.clone())),
            renderer,
            state: Mutex::new(MonitorState::default()),
        };

        let engine_state = EngineState::load(&engine_state_path)?.unwrap_or_default();

        Ok(Self {
            shared: Arc::new(shared),
            engine_state: Mutex::new(engine_state),
            engine_state_path,
            running: Arc::new(Mutex::new(false)),
            poll_interval: options.poll_interval,
            countdown_interval: options.countdown_interval,
        })
    }

    /// Start the two scheduling loops. Fails when already running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if *running {
            return Err(EngineError::AlreadyRunning);
        }
        *running = true;
        drop(running);

        {
            let mut engine_state = self.engine_state.lock().await;
            engine_state.update_started();
            if let Err(err) = engine_state.save(&self.engine_state_path) {
                warn!("Failed to persist engine state: {}", err);
            }
        }

        info!(
            "Starting monitoring loops (poll every {:?}, countdown every {:?})",
            self.poll_interval, self.countdown_interval
        );

        let shared = self.shared.clone();
        let running = self.running.clone();
        let poll_interval = self.poll_interval;
        tokio::spawn(async move {
            let mut interval = time::interval(poll_interval);

            loop {
                interval.tick().await;

                if !*running.lock().await {
                    info!("Monitor loop stopped");
                    break;
                }

                let now_ms = Utc::now().timestamp_millis();
                if let Err(e) = monitor::monitor_tick(&shared, now_ms).await {
                    error!("Error in monitor tick: {}", e);
                }
            }
        });

        let shared = self.shared.clone();
        let running = self.running.clone();
        let countdown_interval = self.countdown_interval;
        tokio::spawn(async move {
            let mut interval = time::interval(countdown_interval);

            loop {
                interval.tick().await;

                if !*running.lock().await {
                    info!("Countdown loop stopped");
                    break;
                }

                let now_ms = Utc::now().timestamp_millis();
                if let Err(e) = countdown::countdown_tick(&shared, now_ms).await {
                    error!("Error in countdown tick: {}", e);
                }
            }
        });

        Ok(())
    }

    /// Halt both loops and clear transient overlay and countdown state.
    /// Persisted stores are left intact for the next start.
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        *running = false;
        drop(running);

        let mut state = self.shared.state.lock().await;
        if state.overlay_visible {
            if let Err(err) = self.shared.renderer.hide_block() {
                warn!("Failed to detach overlay on stop: {}", err);
            }
        }
        state.reset();
        drop(state);

        for session in self.shared.sessions.all().await {
            if let Err(err) = self.shared.renderer.remove_countdown(&session.app_id) {
                warn!("Failed to remove countdown on stop: {}", err);
            }
        }

        info!("Stopping monitor");
        Ok(())
    }

    /// Whether the loops are currently running.
    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    /// Force one immediate state-machine evaluation instead of waiting for
    /// the next scheduled poll.
    pub async fn check_now(&self) -> Result<()> {
        monitor::monitor_tick(&self.shared, Utc::now().timestamp_millis()).await
    }

    /// Pay for and grant a temporary unlock. Returns the session expiry in
    /// epoch milliseconds; fails with `InsufficientFunds` when the wallet
    /// cannot cover the cost.
    pub async fn request_unlock(&self, app_id: &str) -> Result<i64> {
        monitor::request_unlock(&self.shared, app_id, Utc::now().timestamp_millis()).await
    }

    /// Apply a configuration snapshot with full-replace semantics. Returns
    /// false when the snapshot is identical to the last applied one.
    pub async fn apply_snapshot(&self, snapshot: &ConfigSnapshot) -> Result<bool> {
        policy::validate_snapshot(snapshot)?;
        let hash = policy::snapshot_hash(snapshot)?;

        {
            let engine_state = self.engine_state.lock().await;
            if engine_state.snapshot_hash.as_ref() == Some(&hash) {
                debug!("Configuration snapshot unchanged");
                return Ok(false);
            }
        }

        if let Some(coins) = snapshot.wallet_coins {
            self.shared.wallet.seed_if_new(coins).await?;
        }

        let counts = self.shared.avoidance.all().await;
        let apps = policy::apps_from_snapshot(snapshot, &counts);
        let restricted = apps.values().filter(|a| a.is_restricted).count();

        self.shared.policy.replace_all(apps).await?;

        let mut engine_state = self.engine_state.lock().await;
        engine_state.update_snapshot_applied(hash);
        if let Err(err) = engine_state.save(&self.engine_state_path) {
            warn!("Failed to persist engine state: {}", err);
        }

        info!(
            "Applied configuration snapshot ({} apps, {} restricted)",
            snapshot.apps.len(),
            restricted
        );
        Ok(true)
    }

    /// Current wallet balance.
    pub async fn wallet_balance(&self) -> u32 {
        self.shared.wallet.balance().await
    }

    /// Credit coins to the wallet (the reward path of the host app).
    pub async fn credit(&self, amount: u32) -> Result<u32> {
        self.shared.wallet.credit(amount).await
    }

    /// Current blocking state.
    pub async fn block_state(&self) -> BlockState {
        self.shared.state.lock().await.block.clone()
    }

    /// Whether the block overlay is currently attached.
    pub async fn overlay_visible(&self) -> bool {
        self.shared.state.lock().await.overlay_visible
    }

    /// Times the user dismissed a block for the app without paying.
    pub async fn avoided_count(&self, app_id: &str) -> u32 {
        self.shared.avoidance.count(app_id).await
    }

    /// All active unlock sessions.
    pub async fn active_sessions(&self) -> Vec<UnlockSession> {
        self.shared.sessions.all().await
    }

    /// Current restriction settings for an app.
    pub async fn config_for(&self, app_id: &str) -> Option<crate::policy::MonitoredAppConfig> {
        self.shared.policy.config_for(app_id).await
    }

    /// Whether the foreground source last failed with a missing permission.
    pub async fn permission_denied(&self) -> bool {
        self.shared.watcher.lock().await.permission_denied()
    }

    /// Identifier of this installation.
    pub async fn install_id(&self) -> String {
        self.engine_state.lock().await.install_id.clone()
    }
}
