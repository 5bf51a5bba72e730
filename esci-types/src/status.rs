//! Driver-level status codes
//!
//! Every user-visible failure collapses to exactly one of these codes;
//! diagnostic detail only travels through the logging channel.

use std::fmt;

/// Status codes surfaced at the consumer ABI boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverStatus {
    /// Operation completed
    Good,

    /// Operation or device is not supported
    Unsupported,

    /// Operation was cancelled by the caller
    Cancelled,

    /// Device is busy or warming up; retry later
    DeviceBusy,

    /// Malformed argument or protocol violation
    Invalid,

    /// End of image data
    Eof,

    /// Paper jam in the document feeder
    Jammed,

    /// Document feeder is out of documents
    NoDocs,

    /// Scanner cover is open
    CoverOpen,

    /// Out of memory
    NoMem,

    /// Generic transport failure
    IoError,
}

impl DriverStatus {
    /// True for outcomes that describe device state rather than a
    /// software failure.
    pub fn is_device_condition(self) -> bool {
        matches!(
            self,
            Self::DeviceBusy | Self::Jammed | Self::NoDocs | Self::CoverOpen
        )
    }

    pub fn is_good(self) -> bool {
        matches!(self, Self::Good)
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Good => "good",
            Self::Unsupported => "unsupported",
            Self::Cancelled => "cancelled",
            Self::DeviceBusy => "device busy",
            Self::Invalid => "invalid argument",
            Self::Eof => "end of file",
            Self::Jammed => "paper jam",
            Self::NoDocs => "out of documents",
            Self::CoverOpen => "cover open",
            Self::NoMem => "out of memory",
            Self::IoError => "I/O error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_conditions() {
        assert!(DriverStatus::Jammed.is_device_condition());
        assert!(DriverStatus::DeviceBusy.is_device_condition());
        assert!(!DriverStatus::IoError.is_device_condition());
        assert!(!DriverStatus::Good.is_device_condition());
    }

    #[test]
    fn test_display() {
        assert_eq!(DriverStatus::CoverOpen.to_string(), "cover open");
        assert_eq!(DriverStatus::Eof.to_string(), "end of file");
    }
}
