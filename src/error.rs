use thiserror::Error;

/// Engine error type covering every failure the monitoring core can surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A required OS capability (usage query, overlay draw) is unavailable.
    /// Surfaced to the configuration collaborator, never retried by the
    /// core loop itself.
    #[error("required capability unavailable: {0}")]
    PermissionDenied(String),

    /// Unlock attempted with a balance below the cost. No state is mutated.
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: u32, required: u32 },

    /// The foreground-detection source errored. The previous known
    /// foreground value is retained and the query retried next tick.
    #[error("foreground query failed: {0}")]
    TransientQueryFailure(String),

    /// A write to one of the persisted stores failed. The operation is not
    /// committed and in-memory state stays at the last persisted value.
    #[error("failed to persist {store}")]
    PersistenceFailure {
        store: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The visual overlay could not be attached. The logical blocking state
    /// is still recorded and re-attachment is retried on later ticks.
    #[error("overlay attach failed: {0}")]
    OverlayAttachFailure(String),

    /// The app id is not present in the policy as a restricted app.
    #[error("app not configured for restriction: {0}")]
    UnknownApp(String),

    /// `start()` was called while the loops are already running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// A configuration snapshot failed validation.
    #[error("invalid configuration snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Wrap a store write failure, keeping the underlying cause.
    pub(crate) fn persistence<E>(store: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::PersistenceFailure {
            store,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
