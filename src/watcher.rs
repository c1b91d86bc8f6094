use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{EngineError, Result};

/// Default trailing window for foreground events (milliseconds)
pub const EVENT_WINDOW_MS: i64 = 2_000;

/// Default fallback window for most-recently-used lookup (milliseconds)
pub const RECENCY_WINDOW_MS: i64 = 10_000;

/// Kind of a usage event reported by the detection source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundEventKind {
    MovedToForeground,
    MovedToBackground,
    Other,
}

/// One usage event from the detection source, ordered by timestamp.
#[derive(Debug, Clone)]
pub struct ForegroundEvent {
    pub timestamp_ms: i64,
    pub app_id: String,
    pub kind: ForegroundEventKind,
}

/// One entry from the most-recently-used fallback query.
#[derive(Debug, Clone)]
pub struct RecentApp {
    pub app_id: String,
    pub last_used_ms: i64,
}

/// Boundary to the OS facility that reports which app is active. The engine
/// does not define how this is physically obtained; hosts implement it with
/// whatever usage-query capability the platform offers.
pub trait ForegroundSource: Send + Sync {
    /// Usage events within the window, ordered oldest to newest.
    fn query_events(
        &self,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Result<Vec<ForegroundEvent>>;

    /// Apps used within the window with their last-used timestamps.
    fn query_recently_used(
        &self,
        window_start_ms: i64,
        window_end_ms: i64,
    ) -> Result<Vec<RecentApp>>;
}

/// Repeatedly determines the currently active application identifier.
///
/// Each poll looks for the latest move-to-foreground event in a short
/// trailing window, falling back to the most-recently-used app over a longer
/// window when no qualifying event exists (an app sitting in the foreground
/// stops producing events). The engine's own app id is never returned; if it
/// would be selected the previous result is returned unchanged, so drawing
/// the overlay cannot trigger blocking of the engine itself.
pub struct ForegroundWatcher {
    source: Arc<dyn ForegroundSource>,
    own_app_id: String,
    last_seen: Option<String>,
    permission_denied: bool,
    event_window_ms: i64,
    recency_window_ms: i64,
}

impl ForegroundWatcher {
    pub fn new(source: Arc<dyn ForegroundSource>, own_app_id: impl Into<String>) -> Self {
        Self {
            source,
            own_app_id: own_app_id.into(),
            last_seen: None,
            permission_denied: false,
            event_window_ms: EVENT_WINDOW_MS,
            recency_window_ms: RECENCY_WINDOW_MS,
        }
    }

    /// The foreground app at `now_ms`, or the previous known value when the
    /// source fails, or `None` when nothing qualifies. Never aborts the
    /// polling loop.
    pub fn poll(&mut self, now_ms: i64) -> Option<String> {
        let candidate = match self.query_candidate(now_ms) {
            Ok(candidate) => {
                self.permission_denied = false;
                candidate
            }
            Err(err) => {
                self.report_failure(&err);
                return self.last_seen.clone();
            }
        };

        match candidate {
            Some(app_id) if app_id == self.own_app_id => {
                // Our own overlay is on top; keep the previous result so the
                // state machine does not flicker
                self.last_seen.clone()
            }
            Some(app_id) => {
                self.last_seen = Some(app_id.clone());
                Some(app_id)
            }
            None => None,
        }
    }

    /// Whether the last failure was a missing usage-query permission.
    pub fn permission_denied(&self) -> bool {
        self.permission_denied
    }

    fn query_candidate(&self, now_ms: i64) -> Result<Option<String>> {
        let events = self
            .source
            .query_events(now_ms - self.event_window_ms, now_ms)?;

        // Latest move-to-foreground event wins
        let from_events = events
            .iter()
            .filter(|e| e.kind == ForegroundEventKind::MovedToForeground)
            .max_by_key(|e| e.timestamp_ms)
            .map(|e| e.app_id.clone());

        if from_events.is_some() {
            return Ok(from_events);
        }

        // Fallback: the app with the greatest last-used timestamp over the
        // longer window
        let recent = self
            .source
            .query_recently_used(now_ms - self.recency_window_ms, now_ms)?;

        Ok(recent
            .into_iter()
            .max_by_key(|r| r.last_used_ms)
            .map(|r| r.app_id))
    }

    fn report_failure(&mut self, err: &EngineError) {
        match err {
            EngineError::PermissionDenied(reason) => {
                if !self.permission_denied {
                    error!("Usage query permission unavailable: {}", reason);
                    self.permission_denied = true;
                } else {
                    debug!("Usage query still lacks permission: {}", reason);
                }
            }
            other => {
                warn!(
                    "Foreground query failed, keeping previous value: {}",
                    other
                );
            }
        }
    }
}
