//! Error types for camlink.

use std::io;
use thiserror::Error;

use crate::camera::transfer::TransferSession;
use crate::protocol::packet::PacketFault;

/// Result type for camlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for camlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bus or device failure (SPI ioctl, serial I/O, GPIO sysfs).
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Requested baud rate is not one the link can be configured for.
    #[error("Unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    /// Nothing arrived within the local wait window.
    #[error("Empty response to {0}")]
    EmptyResponse(String),

    /// The acknowledgment did not echo the command that was sent.
    #[error("Bad acknowledgment: expected {expected}, got {actual}")]
    BadAck {
        /// Expected leading bytes, hex formatted.
        expected: String,
        /// Received leading bytes, hex formatted.
        actual: String,
    },

    /// A single packet failed validation.
    #[error("Invalid packet: {0}")]
    Packet(#[from] PacketFault),

    /// A bounded wait ran out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No SYNC-ACK after every SYNC attempt.
    #[error("Handshake failed after {attempts} attempts")]
    HandshakeFailed {
        /// Number of SYNC frames sent.
        attempts: u32,
    },

    /// All transfer rounds were used and some packets never validated.
    #[error("Transfer exhausted after {rounds} rounds; packets never validated: {missing:?}")]
    SessionExhausted {
        /// Rounds performed.
        rounds: u32,
        /// 1-based packet indices without a valid observation.
        missing: Vec<u16>,
        /// Full observation history, kept for diagnostics.
        session: Box<TransferSession>,
    },

    /// The operation was cancelled through its `CancelToken`.
    #[error("Operation cancelled")]
    Cancelled,

    /// Unexpected protocol content.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
