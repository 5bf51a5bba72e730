//! Error types for esci-core

use esci_types::DriverStatus;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reply is too short to be valid
    #[error("Reply too short: expected at least {expected} bytes, got {actual} bytes")]
    ReplyTooShort { expected: usize, actual: usize },

    /// Reply did not start with the STX marker
    #[error("Bad info-block leading byte: 0x{0:02X}")]
    BadLeadingByte(u8),

    /// Single-byte reply was none of ACK, NAK or BUSY
    #[error("Unexpected acknowledgement byte: 0x{0:02X}")]
    BadAckByte(u8),

    /// Identity payload contained a truncated or unknown entry
    #[error("Malformed identity entry '{tag}' at offset {offset}")]
    MalformedIdentity { tag: char, offset: usize },

    /// Payload exceeds what a command frame can carry
    #[error("Payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge { size: usize, max: usize },

    /// Field offset outside the 64-byte parameter block
    #[error("Parameter field out of range: offset {offset}, size {size}")]
    ParameterOutOfRange { offset: usize, size: usize },

    /// Device rejected the command
    #[error("Device rejected command: {0}")]
    Rejected(crate::command::Command),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Collapse to the single status code visible at the driver boundary.
    ///
    /// Protocol-framing violations surface as invalid-argument; transport
    /// failures map to the generic I/O code.
    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Io(_) => DriverStatus::IoError,
            Self::Rejected(_) => DriverStatus::Unsupported,
            _ => DriverStatus::Invalid,
        }
    }
}
