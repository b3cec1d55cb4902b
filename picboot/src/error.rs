//! Error types for picboot.

use std::io;
use thiserror::Error;

use crate::protocol::packet::Opcode;
use crate::session::SessionState;

/// Result type for picboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for picboot operations.
///
/// Every variant is fatal for the session that produced it.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port could not be opened or configured.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed Intel HEX input.
    #[error("Invalid HEX file: {0}")]
    HexParse(String),

    /// Image has no data below the declared flash size.
    #[error("Image starts at {start:#06x}, at or beyond flash size {flash_size:#06x}")]
    ImageTruncation {
        /// Lowest populated address of the image.
        start: u32,
        /// Declared flash size in bytes.
        flash_size: u32,
    },

    /// A length or count does not fit the 16-bit wire field.
    #[error("{what} of {value} does not fit the 16-bit length field")]
    ImageTooLarge {
        /// Which field overflowed.
        what: &'static str,
        /// Offending value.
        value: usize,
    },

    /// Link stayed silent past every retry.
    #[error("No response to {opcode} after {attempts} attempts")]
    NoResponse {
        /// Command that went unanswered.
        opcode: Opcode,
        /// Number of times the packet was sent.
        attempts: usize,
    },

    /// Response too short to hold the requested field.
    #[error("Short response: needed {needed} bytes, received {received}")]
    ShortResponse {
        /// Bytes required.
        needed: usize,
        /// Bytes actually received.
        received: usize,
    },

    /// Device rejected the target address (status `0xFE`).
    #[error("Address out of range error when executing {0}")]
    AddressOutOfRange(Opcode),

    /// Device did not recognise the command (status `0xFF`).
    #[error("Invalid command error when executing {0}")]
    InvalidCommand(Opcode),

    /// Any other non-success status.
    #[error("Unknown device error {status:#04x} when executing {opcode}")]
    UnknownDeviceError {
        /// Command that failed.
        opcode: Opcode,
        /// Raw status byte.
        status: u8,
    },

    /// Device checksum differs from the local one.
    #[error("Checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Locally computed checksum.
        expected: u16,
        /// Checksum reported by the device.
        actual: u16,
    },

    /// Device refused the reset command.
    #[error("Reset rejected by device (status {status:#04x})")]
    ResetRejected {
        /// Raw status byte.
        status: u8,
    },

    /// Version response carried unusable row sizes.
    #[error("Invalid device parameters: {0}")]
    InvalidDeviceParameters(String),

    /// A session step was called out of order.
    #[error("Session step requires state {expected}, but session is {actual}")]
    SequenceViolation {
        /// State the step requires.
        expected: SessionState,
        /// State the session is in.
        actual: SessionState,
    },
}

impl Error {
    /// Whether the error came from the device or the link rather than from
    /// local input or I/O.
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::NoResponse { .. }
                | Self::ShortResponse { .. }
                | Self::AddressOutOfRange(_)
                | Self::InvalidCommand(_)
                | Self::UnknownDeviceError { .. }
                | Self::ChecksumMismatch { .. }
                | Self::ResetRejected { .. }
                | Self::InvalidDeviceParameters(_)
        )
    }
}
