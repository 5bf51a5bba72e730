//! IPC errors

use std::io;

use esci_types::DriverStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream ended inside a frame; there is no partial-frame recovery
    #[error("Truncated frame: needed {expected} bytes, stream gave {actual}")]
    TruncatedFrame { expected: usize, actual: usize },

    #[error("Frame payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Reply id does not match the id of the request in flight
    #[error("Correlation mismatch: sent id {sent}, reply carries {received}")]
    CorrelationMismatch { sent: u16, received: u16 },

    /// Helper reported a failure status byte
    #[error("Helper returned failure status 0x{0:02X}")]
    HelperFailure(u8),

    #[error("Helper process exited before becoming ready")]
    HelperExited,

    #[error("Helper did not announce a listening port: {0}")]
    BadPortAnnouncement(String),

    #[error("Timeout waiting for helper after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Single status code visible at the driver boundary
    pub fn status(&self) -> DriverStatus {
        match self {
            Self::TruncatedFrame { .. } | Self::CorrelationMismatch { .. } => {
                DriverStatus::Invalid
            }
            Self::PayloadTooLarge { .. } => DriverStatus::NoMem,
            _ => DriverStatus::IoError,
        }
    }
}
