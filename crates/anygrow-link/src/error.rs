//! Link error types.

use anygrow_protocol::ProtocolError;
use thiserror::Error;

/// Errors that can occur on the device link.
///
/// Only [`LinkError::Protocol`] (a rejected command) and the lifecycle
/// variants reach callers of [`DeviceManager`](crate::DeviceManager).
/// Serial and I/O errors are absorbed by the supervisor and reported as
/// status events.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The command was rejected before reaching the wire.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A read or write on the open port failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No serial handle is open.
    #[error("not connected")]
    NotConnected,

    /// `start()` was called on a running manager.
    #[error("link is already running")]
    AlreadyRunning,

    /// The operation needs a running manager.
    #[error("link is not running")]
    NotRunning,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LinkError {
    /// Whether the error is a command rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, LinkError::Protocol(_))
    }
}

/// Result type alias for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
