use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coin_gate::overlay::{OverlayContent, OverlayRenderer};
use coin_gate::watcher::{ForegroundEvent, ForegroundEventKind, ForegroundSource, RecentApp};
use coin_gate::{
    AppSnapshotEntry, BlockState, ConfigSnapshot, EngineError, EngineOptions, MonitorEngine,
};

/// Foreground source controlled by the test.
#[derive(Default)]
struct ScriptedForeground {
    current: Mutex<Option<String>>,
}

impl ScriptedForeground {
    fn set(&self, app_id: &str) {
        *self.current.lock().unwrap() = Some(app_id.to_string());
    }
}

impl ForegroundSource for ScriptedForeground {
    fn query_events(
        &self,
        _window_start_ms: i64,
        window_end_ms: i64,
    ) -> coin_gate::Result<Vec<ForegroundEvent>> {
        Ok(self
            .current
            .lock()
            .unwrap()
            .iter()
            .map(|app_id| ForegroundEvent {
                timestamp_ms: window_end_ms,
                app_id: app_id.clone(),
                kind: ForegroundEventKind::MovedToForeground,
            })
            .collect())
    }

    fn query_recently_used(
        &self,
        _window_start_ms: i64,
        window_end_ms: i64,
    ) -> coin_gate::Result<Vec<RecentApp>> {
        Ok(self
            .current
            .lock()
            .unwrap()
            .iter()
            .map(|app_id| RecentApp {
                app_id: app_id.clone(),
                last_used_ms: window_end_ms,
            })
            .collect())
    }
}

/// Renderer that counts block shows/hides and tracks countdown indicators.
#[derive(Default)]
struct CountingRenderer {
    shows: Mutex<Vec<OverlayContent>>,
    hides: Mutex<usize>,
    countdowns: Mutex<BTreeMap<String, i64>>,
}

impl CountingRenderer {
    fn show_count(&self) -> usize {
        self.shows.lock().unwrap().len()
    }

    fn hide_count(&self) -> usize {
        *self.hides.lock().unwrap()
    }

    fn has_countdown(&self, app_id: &str) -> bool {
        self.countdowns.lock().unwrap().contains_key(app_id)
    }
}

impl OverlayRenderer for CountingRenderer {
    fn show_block(&self, content: &OverlayContent) -> coin_gate::Result<()> {
        self.shows.lock().unwrap().push(content.clone());
        Ok(())
    }

    fn hide_block(&self) -> coin_gate::Result<()> {
        *self.hides.lock().unwrap() += 1;
        Ok(())
    }

    fn upsert_countdown(&self, app_id: &str, remaining_ms: i64) -> coin_gate::Result<()> {
        self.countdowns
            .lock()
            .unwrap()
            .insert(app_id.to_string(), remaining_ms);
        Ok(())
    }

    fn remove_countdown(&self, app_id: &str) -> coin_gate::Result<()> {
        self.countdowns.lock().unwrap().remove(app_id);
        Ok(())
    }
}

fn make_engine(dir: &Path) -> (MonitorEngine, Arc<ScriptedForeground>, Arc<CountingRenderer>) {
    let foreground = Arc::new(ScriptedForeground::default());
    let renderer = Arc::new(CountingRenderer::default());
    let options = EngineOptions::new("com.coingate").with_data_dir(dir);
    let engine = MonitorEngine::open(options, foreground.clone(), renderer.clone()).unwrap();
    (engine, foreground, renderer)
}

fn snapshot_with(apps: &[(&str, u32, i64)], wallet_coins: Option<u32>) -> ConfigSnapshot {
    let apps = apps
        .iter()
        .map(|(app_id, cost, duration_ms)| {
            (
                app_id.to_string(),
                AppSnapshotEntry {
                    restricted: true,
                    cost: *cost,
                    duration_ms: *duration_ms,
                    message: "Is this really where your evening goes?".to_string(),
                    show_message: true,
                    display_name: String::new(),
                    icon_ref: String::new(),
                    usage_history: vec![15, 25, 5, 0, 40, 20, 30],
                },
            )
        })
        .collect();

    ConfigSnapshot {
        version: "1.0".to_string(),
        wallet_coins,
        apps,
    }
}

#[tokio::test]
async fn unlock_debits_cost_and_boxes_duration() {
    // cost=10, balance=10, duration=600000: unlock succeeds, balance 0,
    // session expires now+600000
    let dir = tempfile::tempdir().unwrap();
    let (engine, foreground, _renderer) = make_engine(dir.path());
    engine
        .apply_snapshot(&snapshot_with(&[("com.social.app", 10, 600_000)], Some(10)))
        .await
        .unwrap();

    foreground.set("com.social.app");
    engine.check_now().await.unwrap();

    let before = chrono::Utc::now().timestamp_millis();
    let expires = engine.request_unlock("com.social.app").await.unwrap();
    let after = chrono::Utc::now().timestamp_millis();

    assert_eq!(engine.wallet_balance().await, 0);
    assert!(expires >= before + 600_000 && expires <= after + 600_000);
    assert_eq!(
        engine.block_state().await,
        BlockState::Unlocked("com.social.app".to_string())
    );
}

#[tokio::test]
async fn unlock_with_low_balance_changes_nothing() {
    // cost=10, balance=5: InsufficientFunds, balance stays 5, no session
    let dir = tempfile::tempdir().unwrap();
    let (engine, foreground, _renderer) = make_engine(dir.path());
    engine
        .apply_snapshot(&snapshot_with(&[("com.social.app", 10, 600_000)], Some(5)))
        .await
        .unwrap();

    foreground.set("com.social.app");
    engine.check_now().await.unwrap();

    let err = engine.request_unlock("com.social.app").await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientFunds {
            balance: 5,
            required: 10
        }
    ));
    assert_eq!(engine.wallet_balance().await, 5);
    assert!(engine.active_sessions().await.is_empty());
    assert!(engine.overlay_visible().await);
}

#[tokio::test]
async fn dismissing_block_without_paying_counts_avoidance() {
    // Restricted A foregrounded, overlay shown; switch to unrestricted B
    // without unlocking: avoided count for A increments by one
    let dir = tempfile::tempdir().unwrap();
    let (engine, foreground, renderer) = make_engine(dir.path());
    engine
        .apply_snapshot(&snapshot_with(&[("com.social.app", 10, 600_000)], None))
        .await
        .unwrap();

    foreground.set("com.social.app");
    engine.check_now().await.unwrap();
    assert!(engine.overlay_visible().await);

    foreground.set("com.calculator");
    engine.check_now().await.unwrap();

    assert_eq!(engine.avoided_count("com.social.app").await, 1);
    assert_eq!(renderer.hide_count(), 1);

    // Coming back and leaving again is a second cycle
    foreground.set("com.social.app");
    engine.check_now().await.unwrap();
    foreground.set("com.calculator");
    engine.check_now().await.unwrap();
    assert_eq!(engine.avoided_count("com.social.app").await, 2);
}

#[tokio::test]
async fn expiry_while_foregrounded_reblocks_promptly() {
    // Session for A expires while A is still foregrounded: the overlay is
    // re-shown by the running countdown loop without an extra natural poll
    let dir = tempfile::tempdir().unwrap();
    let foreground = Arc::new(ScriptedForeground::default());
    let renderer = Arc::new(CountingRenderer::default());
    let mut options = EngineOptions::new("com.coingate").with_data_dir(dir.path());
    options.poll_interval = Duration::from_millis(20);
    options.countdown_interval = Duration::from_millis(20);
    let engine = MonitorEngine::open(options, foreground.clone(), renderer.clone()).unwrap();

    engine
        .apply_snapshot(&snapshot_with(&[("com.social.app", 0, 80)], None))
        .await
        .unwrap();

    foreground.set("com.social.app");
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.overlay_visible().await);

    engine.request_unlock("com.social.app").await.unwrap();
    assert!(!engine.overlay_visible().await);

    // Wait past the 80 ms session plus a few loop periods
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(engine.active_sessions().await.is_empty());
    assert!(engine.overlay_visible().await);
    assert_eq!(
        engine.block_state().await,
        BlockState::Blocking("com.social.app".to_string())
    );
    assert!(!renderer.has_countdown("com.social.app"));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn repeated_checks_with_stable_foreground_emit_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, foreground, renderer) = make_engine(dir.path());
    engine
        .apply_snapshot(&snapshot_with(&[("com.social.app", 10, 600_000)], None))
        .await
        .unwrap();

    foreground.set("com.social.app");
    engine.check_now().await.unwrap();

    let shows = renderer.show_count();
    let hides = renderer.hide_count();

    engine.check_now().await.unwrap();
    engine.check_now().await.unwrap();

    assert_eq!(renderer.show_count(), shows);
    assert_eq!(renderer.hide_count(), hides);
    assert_eq!(engine.avoided_count("com.social.app").await, 0);
}

#[tokio::test]
async fn snapshot_round_trips_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = snapshot_with(
        &[("com.social.app", 10, 600_000), ("com.video.app", 25, 120_000)],
        Some(40),
    );

    {
        let (engine, _foreground, _renderer) = make_engine(dir.path());
        engine.apply_snapshot(&snapshot).await.unwrap();
    }

    // A fresh engine over the same data directory sees the same policy
    let (engine, _foreground, _renderer) = make_engine(dir.path());

    let social = engine.config_for("com.social.app").await.unwrap();
    assert!(social.is_restricted);
    assert_eq!(social.unlock_cost, 10);
    assert_eq!(social.unlock_duration_ms, 600_000);

    let video = engine.config_for("com.video.app").await.unwrap();
    assert!(video.is_restricted);
    assert_eq!(video.unlock_cost, 25);
    assert_eq!(video.unlock_duration_ms, 120_000);

    assert_eq!(engine.wallet_balance().await, 40);
}

#[tokio::test]
async fn wallet_and_sessions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (engine, foreground, _renderer) = make_engine(dir.path());
        engine
            .apply_snapshot(&snapshot_with(&[("com.social.app", 10, 600_000)], Some(30)))
            .await
            .unwrap();
        foreground.set("com.social.app");
        engine.check_now().await.unwrap();
        engine.request_unlock("com.social.app").await.unwrap();
        assert_eq!(engine.wallet_balance().await, 20);
    }

    let (engine, foreground, renderer) = make_engine(dir.path());
    assert_eq!(engine.wallet_balance().await, 20);

    // The unpaid remainder of the session is still honored
    let sessions = engine.active_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].app_id, "com.social.app");

    foreground.set("com.social.app");
    engine.check_now().await.unwrap();
    assert!(!engine.overlay_visible().await);
    assert_eq!(renderer.show_count(), 0);
}

#[tokio::test]
async fn stale_sessions_are_dropped_on_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (engine, foreground, _renderer) = make_engine(dir.path());
        engine
            .apply_snapshot(&snapshot_with(&[("com.social.app", 0, 30)], None))
            .await
            .unwrap();
        foreground.set("com.social.app");
        engine.check_now().await.unwrap();
        engine.request_unlock("com.social.app").await.unwrap();
    }

    // Let the 30 ms session lapse while "stopped"
    std::thread::sleep(Duration::from_millis(60));

    let (engine, foreground, _renderer) = make_engine(dir.path());
    assert!(engine.active_sessions().await.is_empty());

    foreground.set("com.social.app");
    engine.check_now().await.unwrap();
    assert!(engine.overlay_visible().await);
}

#[tokio::test]
async fn reward_credits_fund_later_unlocks() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, foreground, _renderer) = make_engine(dir.path());
    engine
        .apply_snapshot(&snapshot_with(&[("com.social.app", 10, 600_000)], None))
        .await
        .unwrap();

    foreground.set("com.social.app");
    engine.check_now().await.unwrap();
    assert!(engine.request_unlock("com.social.app").await.is_err());

    engine.credit(10).await.unwrap();
    engine.request_unlock("com.social.app").await.unwrap();
    assert_eq!(engine.wallet_balance().await, 0);
}
