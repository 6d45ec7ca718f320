//! Error types for pump controller protocol operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// Result type alias for pump controller operations.
pub type Result<T> = std::result::Result<T, PumpError>;

/// Error types for pump controller communication.
#[derive(Error, Debug)]
pub enum PumpError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No candidate port accepted the handshake
    #[error("No controller answered the handshake on {tried} port(s)")]
    TransportOpen {
        /// Number of candidate ports tried
        tried: usize,
    },

    /// Write or reply wait exceeded its timeout
    #[error("Exchange timed out waiting for {stage}")]
    ExchangeTimeout {
        /// Which wait expired ("write" or "reply")
        stage: &'static str,
    },

    /// Reply had the wrong marker/opcode or a malformed length
    #[error("Invalid frame: expected {expected}, got {actual:?}")]
    FrameValidation {
        /// Expected frame prefix
        expected: String,
        /// Raw reply received
        actual: String,
    },

    /// Reply checksum validation failed
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Decoded payload is not the exact width of the message type
    #[error("Payload length mismatch: expected {expected} bytes, got {actual}")]
    PayloadLength {
        /// Expected byte count
        expected: usize,
        /// Decoded byte count
        actual: usize,
    },

    /// Port reported a fault outside of an exchange
    #[error("Device disconnected")]
    Disconnected,

    /// Exchange attempted with no port open
    #[error("Not connected")]
    NotConnected,

    /// Command not accepted in the current session state
    #[error("Cannot {command} while session is {state:?}")]
    InvalidState {
        /// Current session state
        state: SessionState,
        /// Rejected command
        command: &'static str,
    },

    /// Parameter value outside its documented range
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Parameter field name
        field: &'static str,
        /// Offending value
        value: u32,
        /// Inclusive lower bound
        min: u32,
        /// Inclusive upper bound
        max: u32,
    },

    /// Worker thread has exited
    #[error("Transport worker stopped")]
    WorkerStopped,

    /// Configuration rejected
    #[error("Config error: {0}")]
    Config(String),
}

/// Error taxonomy carried by events.
///
/// `PumpError` owns I/O errors and is not `Clone`; events carry this
/// classification instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    TransportOpen,
    ExchangeTimeout,
    FrameValidation,
    ChecksumMismatch,
    PayloadLength,
    Disconnection,
    NotConnected,
    Other,
}

impl PumpError {
    /// Classify this error into the event taxonomy.
    pub fn kind(&self) -> FailureKind {
        match self {
            PumpError::TransportOpen { .. } => FailureKind::TransportOpen,
            PumpError::ExchangeTimeout { .. } => FailureKind::ExchangeTimeout,
            PumpError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                FailureKind::ExchangeTimeout
            }
            PumpError::FrameValidation { .. } => FailureKind::FrameValidation,
            PumpError::ChecksumMismatch => FailureKind::ChecksumMismatch,
            PumpError::PayloadLength { .. } => FailureKind::PayloadLength,
            PumpError::Disconnected | PumpError::SerialPort(_) | PumpError::Io(_) => {
                FailureKind::Disconnection
            }
            PumpError::NotConnected => FailureKind::NotConnected,
            _ => FailureKind::Other,
        }
    }

    /// True when the error means the port itself is broken, not just late.
    pub fn is_port_fault(&self) -> bool {
        self.kind() == FailureKind::Disconnection
    }
}
