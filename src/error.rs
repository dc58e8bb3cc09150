//! # Error Types
//!
//! Custom error types for Quad Ground using `thiserror`.

use thiserror::Error;

use crate::protocol::packets::FrameType;

/// Main error type for Quad Ground
#[derive(Debug, Error)]
pub enum GroundError {
    /// Telemetry frame failed its XOR checksum
    #[error("Checksum mismatch in {frame_type:?} frame: computed 0x{computed:02X}, received 0x{received:02X}")]
    ChecksumMismatch {
        frame_type: FrameType,
        computed: u8,
        received: u8,
    },

    /// Leading byte is not a known frame tag
    #[error("Unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// Frame or command has the wrong number of bytes
    #[error("Frame length error: expected {expected} bytes, got {actual}")]
    FrameLength { expected: usize, actual: usize },

    /// TCP link failures (connect, read, write, timeout)
    #[error("Connection error: {0}")]
    Connection(String),

    /// ESC reset waited too long for the switch or the user
    #[error("ESC reset timed out: {0}")]
    SequenceTimeout(String),

    /// ESC reset cancelled by the user
    #[error("ESC reset cancelled by user")]
    UserCancelled,

    /// ESC reset ended in a failure other than a timeout
    #[error("ESC reset failed: {0}")]
    SequenceFailed(String),

    /// Operation refused before any state change
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Console input that is not a known command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Malformed reset banner line
    #[error("Invalid reset banner: {0}")]
    Banner(String),

    /// Telemetry record could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Quad Ground
pub type Result<T> = std::result::Result<T, GroundError>;
