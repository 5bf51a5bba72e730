//! ESC/I command definitions
//!
//! A command frame is one or two bytes: an ESC (0x1B) or FS (0x1C)
//! prefix followed by the opcode letter, or a single bare control byte
//! for paper motion and cancel.

use std::fmt;

use crate::{ESC, FS};

/// Shape of the reply a command produces
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReplyShape {
    /// Single acknowledgement byte (ACK / NAK / BUSY)
    Ack,

    /// 4-byte info block followed by a length-prefixed payload
    InfoBlock,

    /// No reply at all
    None,
}

/// Protocol command opcodes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    // Session control
    Initialize,

    // Inquiry
    RequestIdentity,
    RequestStatus,
    RequestCondition,
    RequestExtendedStatus,

    // Scan setup
    SetColorMode,
    SetDataFormat,
    SetResolution,
    SetScanArea,
    SetBrightness,
    SetGamma,
    SetHalftone,
    SetSpeed,
    SetLineCount,
    SetFocus,
    ControlExtension,

    // Scanning
    StartScan,

    // Carriage lock
    LockScanner,
    UnlockScanner,

    // Extended command set (FS prefix)
    ExtRequestIdentity,
    ExtRequestParameters,
    ExtSetParameters,
    ExtStartScan,

    // Bare control bytes
    EjectPaper,
    LoadPaper,
    CancelScan,
}

impl Command {
    /// Encode the command frame exactly as it goes on the wire
    pub fn encode(self) -> Vec<u8> {
        match self.frame() {
            (Some(prefix), op) => vec![prefix, op],
            (None, op) => vec![op],
        }
    }

    fn frame(self) -> (Option<u8>, u8) {
        match self {
            Self::Initialize => (Some(ESC), b'@'),
            Self::RequestIdentity => (Some(ESC), b'I'),
            Self::RequestStatus => (Some(ESC), b'F'),
            Self::RequestCondition => (Some(ESC), b'S'),
            Self::RequestExtendedStatus => (Some(ESC), b'f'),
            Self::SetColorMode => (Some(ESC), b'C'),
            Self::SetDataFormat => (Some(ESC), b'D'),
            Self::SetResolution => (Some(ESC), b'R'),
            Self::SetScanArea => (Some(ESC), b'A'),
            Self::SetBrightness => (Some(ESC), b'L'),
            Self::SetGamma => (Some(ESC), b'Z'),
            Self::SetHalftone => (Some(ESC), b'B'),
            Self::SetSpeed => (Some(ESC), b'g'),
            Self::SetLineCount => (Some(ESC), b'd'),
            Self::SetFocus => (Some(ESC), b'p'),
            Self::ControlExtension => (Some(ESC), b'e'),
            Self::StartScan => (Some(ESC), b'G'),
            Self::LockScanner => (Some(ESC), b'('),
            Self::UnlockScanner => (Some(ESC), b')'),
            Self::ExtRequestIdentity => (Some(FS), b'I'),
            Self::ExtRequestParameters => (Some(FS), b'S'),
            Self::ExtSetParameters => (Some(FS), b'W'),
            Self::ExtStartScan => (Some(FS), b'G'),
            Self::EjectPaper => (None, 0x0C),
            Self::LoadPaper => (None, 0x19),
            Self::CancelScan => (None, 0x18),
        }
    }

    /// What the device sends back after the command (and any argument
    /// bytes) have been written
    pub fn reply_shape(self) -> ReplyShape {
        match self {
            Self::RequestIdentity
            | Self::RequestStatus
            | Self::RequestCondition
            | Self::RequestExtendedStatus
            | Self::ExtRequestIdentity
            | Self::ExtRequestParameters => ReplyShape::InfoBlock,

            // Image data follows its own block framing
            Self::StartScan | Self::ExtStartScan | Self::CancelScan => ReplyShape::None,

            _ => ReplyShape::Ack,
        }
    }

    /// Number of argument bytes that follow the opcode
    pub fn arg_len(self) -> usize {
        match self {
            Self::SetResolution => 4,
            Self::SetScanArea => 8,
            Self::SetColorMode
            | Self::SetDataFormat
            | Self::SetBrightness
            | Self::SetGamma
            | Self::SetHalftone
            | Self::SetSpeed
            | Self::SetLineCount
            | Self::SetFocus
            | Self::ControlExtension => 1,
            Self::ExtSetParameters => crate::PARAMETER_BLOCK_SIZE,
            _ => 0,
        }
    }

    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialize => "ESC @",
            Self::RequestIdentity => "ESC I",
            Self::RequestStatus => "ESC F",
            Self::RequestCondition => "ESC S",
            Self::RequestExtendedStatus => "ESC f",
            Self::SetColorMode => "ESC C",
            Self::SetDataFormat => "ESC D",
            Self::SetResolution => "ESC R",
            Self::SetScanArea => "ESC A",
            Self::SetBrightness => "ESC L",
            Self::SetGamma => "ESC Z",
            Self::SetHalftone => "ESC B",
            Self::SetSpeed => "ESC g",
            Self::SetLineCount => "ESC d",
            Self::SetFocus => "ESC p",
            Self::ControlExtension => "ESC e",
            Self::StartScan => "ESC G",
            Self::LockScanner => "ESC (",
            Self::UnlockScanner => "ESC )",
            Self::ExtRequestIdentity => "FS I",
            Self::ExtRequestParameters => "FS S",
            Self::ExtSetParameters => "FS W",
            Self::ExtStartScan => "FS G",
            Self::EjectPaper => "FF",
            Self::LoadPaper => "PF",
            Self::CancelScan => "CAN",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_esc_frame() {
        assert_eq!(Command::RequestIdentity.encode(), vec![0x1B, b'I']);
        assert_eq!(Command::Initialize.encode(), vec![0x1B, b'@']);
        assert_eq!(Command::StartScan.encode(), vec![0x1B, b'G']);
    }

    #[test]
    fn test_encode_fs_frame() {
        assert_eq!(Command::ExtSetParameters.encode(), vec![0x1C, b'W']);
        assert_eq!(Command::ExtStartScan.encode(), vec![0x1C, b'G']);
    }

    #[test]
    fn test_encode_bare_bytes() {
        assert_eq!(Command::EjectPaper.encode(), vec![0x0C]);
        assert_eq!(Command::LoadPaper.encode(), vec![0x19]);
        assert_eq!(Command::CancelScan.encode(), vec![0x18]);
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(Command::RequestIdentity.reply_shape(), ReplyShape::InfoBlock);
        assert_eq!(Command::SetResolution.reply_shape(), ReplyShape::Ack);
        assert_eq!(Command::CancelScan.reply_shape(), ReplyShape::None);
    }

    #[test]
    fn test_arg_lengths() {
        assert_eq!(Command::SetScanArea.arg_len(), 8);
        assert_eq!(Command::SetResolution.arg_len(), 4);
        assert_eq!(Command::ExtSetParameters.arg_len(), 64);
        assert_eq!(Command::RequestIdentity.arg_len(), 0);
    }
}
