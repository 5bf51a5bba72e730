//! Reply framing: acknowledgement bytes and info blocks
//!
//! # Info-block structure
//!
//! ```text
//! ┌──────────┬──────────┬───────────────┬─────────────┐
//! │   STX    │  Status  │ Payload length│   Payload   │
//! │  1 byte  │  1 byte  │  2 bytes (LE) │   N bytes   │
//! │  (0x02)  │  (bits)  │               │             │
//! └──────────┴──────────┴───────────────┴─────────────┘
//! ```

use bytes::{Buf, BytesMut};
use std::fmt;

use crate::error::{Error, Result};

/// Info-block leading byte
pub const STX: u8 = 0x02;

/// Positive acknowledgement
pub const ACK: u8 = 0x06;

/// Device busy
pub const BUSY: u8 = 0x07;

/// Negative acknowledgement / unsupported
pub const NAK: u8 = 0x15;

/// Decoded single-byte reply
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Command accepted
    Ok,

    /// Device busy; retry later
    Busy,

    /// Command rejected or unsupported
    Rejected,
}

impl Ack {
    /// Decode a single acknowledgement byte
    pub fn decode(byte: u8) -> Result<Self> {
        match byte {
            ACK => Ok(Self::Ok),
            BUSY => Ok(Self::Busy),
            NAK => Ok(Self::Rejected),
            other => Err(Error::BadAckByte(other)),
        }
    }
}

bitflags::bitflags! {
    /// Status byte carried in every info block
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct StatusBits: u8 {
        /// Unrecoverable device error
        const FATAL        = 0x80;
        /// Device is not ready (warming up, lamp off)
        const NOT_READY    = 0x40;
        /// Last block of the scan area
        const AREA_END     = 0x20;
        /// An option unit is installed
        const OPTION       = 0x10;
        /// Color attribute bits of the current block
        const COLOR_ATTR   = 0x0C;
        /// Device supports the extended (FS) command set
        const EXT_COMMANDS = 0x02;
    }
}

bitflags::bitflags! {
    /// Trailing error byte after each extended-protocol image block
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct TrailerBits: u8 {
        /// Unrecoverable device error; abort the transfer
        const FATAL      = 0x80;
        /// Device not ready
        const NOT_READY  = 0x40;
        /// End of the current page
        const PAGE_END   = 0x20;
        /// Device acknowledged a cancel request
        const CANCEL_ACK = 0x10;
    }
}

/// Decoded 4-byte info header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InfoBlock {
    /// Status bits reported with this reply
    pub status: StatusBits,

    /// Number of payload bytes that follow the header
    pub payload_len: u16,
}

impl InfoBlock {
    /// Header size in bytes
    pub const SIZE: usize = crate::INFO_BLOCK_SIZE;

    /// Decode the 4-byte header, consuming it from `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer holds fewer than 4 bytes or the
    /// leading byte is not STX. Both are protocol violations the caller
    /// must not blindly retry.
    pub fn decode(buf: &mut BytesMut) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::ReplyTooShort {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }

        let leading = buf.get_u8();
        if leading != STX {
            return Err(Error::BadLeadingByte(leading));
        }

        let status = StatusBits::from_bits_retain(buf.get_u8());
        let payload_len = buf.get_u16_le();

        Ok(Self {
            status,
            payload_len,
        })
    }

    pub fn is_fatal(&self) -> bool {
        self.status.contains(StatusBits::FATAL)
    }

    pub fn is_ready(&self) -> bool {
        !self.status.contains(StatusBits::NOT_READY)
    }

    pub fn is_area_end(&self) -> bool {
        self.status.contains(StatusBits::AREA_END)
    }
}

impl fmt::Display for InfoBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InfoBlock(status=0x{:02X}, len={})",
            self.status.bits(),
            self.payload_len
        )
    }
}
