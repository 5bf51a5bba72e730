//! High-level error types

use esci_types::DriverStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] esci_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] esci_transport::Error),

    #[error("IPC error: {0}")]
    Ipc(#[from] esci_ipc::Error),

    #[error("Type error: {0}")]
    Types(#[from] esci_types::Error),

    #[error("Device not open")]
    NotOpen,

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid response from device: {0}")]
    InvalidResponse(String),

    #[error("Device busy")]
    Busy,

    #[error("Scan cancelled")]
    Cancelled,

    /// Device-state outcome decoded from status bits; not a failure of
    /// this engine but a domain condition surfaced verbatim
    #[error("Device condition: {0}")]
    Condition(DriverStatus),
}

impl Error {
    /// The single status code surfaced at the consumer ABI
    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Core(e) => e.status(),
            Self::Transport(e) => e.status(),
            Self::Ipc(e) => e.status(),
            Self::Types(_) => DriverStatus::Invalid,
            Self::NotOpen => DriverStatus::Invalid,
            Self::NotSupported(_) => DriverStatus::Unsupported,
            Self::InvalidResponse(_) => DriverStatus::Invalid,
            Self::Busy => DriverStatus::DeviceBusy,
            Self::Cancelled => DriverStatus::Cancelled,
            Self::Condition(status) => *status,
        }
    }
}
