//! Error types for the LSR updater

use thiserror::Error;

/// Main error type for the updater
#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Timeout: no reply to '{command}' within {timeout_ms}ms")]
    TimeoutError { command: String, timeout_ms: u64 },

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Device {0} unavailable")]
    DeviceUnavailable(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for UpdaterError {
    fn from(err: anyhow::Error) -> Self {
        UpdaterError::Internal(err.to_string())
    }
}
