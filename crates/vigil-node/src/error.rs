//! Error types for vigil-node.

use thiserror::Error;
use vigil_alerts::AlertError;

/// Errors that can occur while loading and wiring a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The alerting engine rejected something.
    #[error("alerting error: {0}")]
    Alert(#[from] AlertError),

    /// JSON error.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
