use thiserror::Error;

#[derive(Debug, Error)]
pub enum SwitchboardError {
    // Graph errors
    #[error("Graph configuration error: {0}")]
    GraphConfiguration(String),

    #[error("Node slot {0} was reserved but never defined")]
    UnfilledSlot(usize),

    #[error("Node {node} references unknown node {target}")]
    DanglingReference { node: usize, target: usize },

    #[error("Hop limit of {0} exceeded without reaching a terminal node")]
    HopLimitExceeded(usize),

    // Collaborator errors
    #[error("Call control failed: {directive}: {message}")]
    CallControl { directive: String, message: String },

    #[error("Dialog bridge failed: {0}")]
    DialogBridge(String),

    #[error("Transfer destination missing from session attribute '{0}'")]
    MissingDestination(String),

    #[error("Asset '{asset}' has no entry for locale {locale}")]
    MissingAsset { asset: String, locale: String },

    // Session errors
    #[error("Stale event for call {call_id}: {reason}")]
    StaleEvent { call_id: String, reason: String },

    #[error("Session lane closed: {0}")]
    LaneClosed(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SwitchboardError {
    /// Whether this error comes from an external collaborator rather than the
    /// flow graph itself. External failures become `Outcome::failure()`.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::CallControl { .. }
                | Self::DialogBridge(_)
                | Self::MissingDestination(_)
                | Self::MissingAsset { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;
