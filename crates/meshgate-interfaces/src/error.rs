//! Error types for the driver layer.

/// Errors that can occur during driver operations.
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("driver not started")]
    NotStarted,
    #[error("driver stopped")]
    Stopped,
    #[error("transmit failed: {0}")]
    TransmitFailed(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("peer table full")]
    PeerTableFull,
}
