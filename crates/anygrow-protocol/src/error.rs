//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding a command.
///
/// Every variant is a rejection of the command before any byte reaches the
/// wire. Decoding never errors: a window that is not a valid telemetry frame
/// is simply "no reading yet".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Channel LED command did not carry exactly one entry per channel.
    #[error("channel LED command needs {expected} channels, got {actual}")]
    ChannelCount {
        /// Required number of channel entries.
        expected: usize,
        /// Number of entries supplied.
        actual: usize,
    },

    /// A numeric field is outside the range the device accepts.
    #[error("{field} out of range: {value} (max {max})")]
    FieldOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Supplied value.
        value: u32,
        /// Largest accepted value.
        max: u32,
    },

    /// The assembled frame does not have the fixed frame length.
    #[error("encoded frame length mismatch: expected {expected} bytes, got {actual}")]
    FrameLength {
        /// Required frame length.
        expected: usize,
        /// Length that would have been produced.
        actual: usize,
    },

    /// A frame template is unusable (missing STX, or the payload does not fit).
    #[error("invalid template for {command}: {reason}")]
    Template {
        /// Command the template belongs to.
        command: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Textual command or mode could not be parsed.
    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
