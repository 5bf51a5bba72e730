//! Transport errors
//!
//! Callers never see transport-specific failure codes: everything that
//! goes wrong on the wire collapses to the generic I/O category at the
//! driver boundary.

use std::io;

use esci_types::DriverStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Channel not open")]
    NotOpen,

    #[error("Channel already open")]
    AlreadyOpen,

    #[error("Unsupported device name: {0}")]
    UnsupportedDevice(String),

    #[error("No matching device for {0}")]
    NoDevice(String),

    #[error("Short transfer: moved {moved} of {requested} bytes")]
    ShortTransfer { moved: usize, requested: usize },

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] esci_ipc::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn status(&self) -> DriverStatus {
        match self {
            Self::UnsupportedDevice(_) | Self::NoDevice(_) => DriverStatus::Unsupported,
            _ => DriverStatus::IoError,
        }
    }
}
