// Error types shared across the engine

use crate::composition::DeviceId;
use crate::timeline::{Position, TempoMapError};
use crate::transport::TransportState;
use std::path::PathBuf;

/// Errors raised by an output/input backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend disconnected: {0}")]
    Disconnected(String),

    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Backend restart failed: {0}")]
    RestartFailed(String),
}

/// Errors returned by transport operations
///
/// None of these are fatal: the transport stays in a consistent state and
/// the same information is published as a notification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Cannot {operation} while {from}")]
    InvalidTransition {
        from: TransportState,
        operation: &'static str,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Recording disabled until health problems are acknowledged")]
    RecordingDisabled,

    #[error("Invalid loop range {start}..{end}")]
    InvalidLoop { start: Position, end: Position },

    #[error("Invalid sync settings: {0}")]
    InvalidSync(String),

    #[error("Command queue full")]
    QueueFull,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Top-level engine errors (setup, configuration, thread management)
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No config directory on this platform")]
    NoConfigDir,

    #[error(transparent)]
    TempoMap(#[from] TempoMapError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Dispatch thread error: {0}")]
    Thread(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
