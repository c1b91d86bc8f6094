//! Coin Gate
//!
//! An embedded monitoring engine that watches which application is in the
//! foreground and, for a configurable set of restricted apps, interposes a
//! paid, time-boxed access gate backed by a virtual-coin wallet.
//!
//! The host application supplies the platform capabilities the engine
//! cannot own: a [`watcher::ForegroundSource`] that reports usage events and
//! an [`overlay::OverlayRenderer`] that draws the block screen and the
//! per-app countdown indicators. The engine owns everything in between:
//! foreground polling, the blocking state machine, the wallet ledger, the
//! unlock session store and countdown-driven expiry.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use coin_gate::{MonitorEngine, EngineOptions};
//! # use coin_gate::watcher::ForegroundSource;
//! # use coin_gate::overlay::OverlayRenderer;
//! # async fn example(
//! #     source: Arc<dyn ForegroundSource>,
//! #     renderer: Arc<dyn OverlayRenderer>,
//! # ) -> coin_gate::Result<()> {
//! let engine = MonitorEngine::open(EngineOptions::new("com.coingate"), source, renderer)?;
//! engine.start().await?;
//! // ... later, from the block-overlay UI:
//! let expires_at_ms = engine.request_unlock("com.social.app").await?;
//! # Ok(())
//! # }
//! ```

pub mod avoidance;
pub mod engine;
pub mod error;
pub mod overlay;
pub mod platform;
pub mod policy;
pub mod session;
pub mod wallet;
pub mod watcher;

pub use avoidance::AvoidanceCounter;
pub use engine::{BlockState, EngineOptions, EngineState, MonitorEngine};
pub use error::{EngineError, Result};
pub use overlay::{OverlayContent, OverlayRenderer};
pub use policy::{AccessPolicy, AppSnapshotEntry, ConfigSnapshot, MonitoredAppConfig};
pub use session::{UnlockSession, UnlockSessionStore};
pub use wallet::WalletLedger;
pub use watcher::{ForegroundEvent, ForegroundEventKind, ForegroundSource, ForegroundWatcher, RecentApp};
