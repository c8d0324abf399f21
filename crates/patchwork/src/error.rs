//! Error types for graph access and the autoconnect service.

use thiserror::Error;

/// Errors reported by a media-graph backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("port not found: {0}")]
    PortNotFound(String),

    #[error("already connected: {source_port} -> {destination}")]
    AlreadyConnected {
        source_port: String,
        destination: String,
    },

    #[error("not connected: {source_port} -> {destination}")]
    NotConnected {
        source_port: String,
        destination: String,
    },

    #[error("media server unavailable: {0}")]
    Unavailable(String),

    #[error("media server error: {0}")]
    Backend(String),
}

/// Errors reported by the autoconnect service.
#[derive(Debug, Error)]
pub enum AutoconnectError {
    #[error("autoconnect is not running")]
    NotRunning,

    #[error("autoconnect is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("reconciliation lock poisoned")]
    LockPoisoned,

    #[error("failed to spawn autoconnect thread: {0}")]
    Thread(#[from] std::io::Error),
}
