//! Extended-status (ESC f) reply decoding
//!
//! The payload is a fixed 42-byte block. Field offsets are kept in one
//! table rather than scattered through the decoder:
//!
//! | offset | field                                   |
//! |--------|-----------------------------------------|
//! | 0      | device status bits                      |
//! | 1      | ADF status bits                         |
//! | 2..6   | ADF max pixels, u16 LE width and height |
//! | 6      | TPU status bits                         |
//! | 7..11  | TPU max pixels                          |
//! | 11     | flatbed status bits                     |
//! | 12..16 | flatbed max pixels                      |
//! | 16..26 | reserved                                |
//! | 26..42 | firmware name, ASCII, space padded      |

use crate::error::{Error, Result};
use crate::EXT_STATUS_SIZE;

/// Field offsets within the extended-status payload
mod offsets {
    pub const DEVICE_STATUS: usize = 0;
    pub const ADF_STATUS: usize = 1;
    pub const ADF_PIXELS: usize = 2;
    pub const TPU_STATUS: usize = 6;
    pub const TPU_PIXELS: usize = 7;
    pub const FB_STATUS: usize = 11;
    pub const FB_PIXELS: usize = 12;
    pub const FIRMWARE: usize = 26;
    pub const FIRMWARE_LEN: usize = 16;
}

bitflags::bitflags! {
    /// Device-level status byte at offset 0
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct DeviceStatus: u8 {
        /// Unrecoverable error
        const FATAL       = 0x80;
        /// Lamp warming up; poll until clear
        const WARMING_UP  = 0x02;
        /// Push button pressed on the front panel
        const PUSH_BUTTON = 0x01;
    }
}

bitflags::bitflags! {
    /// Per-extension status byte
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct ExtStatus: u8 {
        /// Extension is physically installed
        const INSTALLED   = 0x80;
        /// Extension is the active scan source
        const ENABLED     = 0x40;
        /// Extension reports an error condition
        const ERROR       = 0x20;
        /// Out of documents
        const PAPER_EMPTY = 0x08;
        /// Paper jam
        const PAPER_JAM   = 0x04;
        /// Cover open
        const COVER_OPEN  = 0x02;
    }
}

/// The three optional scan sources
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    Flatbed,
    Adf,
    TransparencyUnit,
}

/// Snapshot of one extension taken from an extended-status reply
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtensionReport {
    pub kind: ExtensionKind,
    pub status: ExtStatus,

    /// Maximum scan extent in pixels at the device base resolution
    pub max_pixels: (u16, u16),
}

impl ExtensionReport {
    pub fn is_installed(&self) -> bool {
        self.status.contains(ExtStatus::INSTALLED)
    }
}

/// Fully decoded extended-status reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub device: DeviceStatus,
    pub adf: ExtensionReport,
    pub tpu: ExtensionReport,
    pub flatbed: ExtensionReport,
    pub firmware: String,
}

impl StatusReport {
    /// Decode a 42-byte extended-status payload.
    ///
    /// Decoding is a pure function of the payload: the same bytes decode
    /// to the same report every time.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < EXT_STATUS_SIZE {
            return Err(Error::ReplyTooShort {
                expected: EXT_STATUS_SIZE,
                actual: payload.len(),
            });
        }

        let device = DeviceStatus::from_bits_retain(payload[offsets::DEVICE_STATUS]);

        let adf = extension_at(
            payload,
            ExtensionKind::Adf,
            offsets::ADF_STATUS,
            offsets::ADF_PIXELS,
        );
        let tpu = extension_at(
            payload,
            ExtensionKind::TransparencyUnit,
            offsets::TPU_STATUS,
            offsets::TPU_PIXELS,
        );
        let flatbed = extension_at(
            payload,
            ExtensionKind::Flatbed,
            offsets::FB_STATUS,
            offsets::FB_PIXELS,
        );

        let raw_name = &payload[offsets::FIRMWARE..offsets::FIRMWARE + offsets::FIRMWARE_LEN];
        let firmware = String::from_utf8_lossy(raw_name).trim_end().to_string();

        Ok(Self {
            device,
            adf,
            tpu,
            flatbed,
            firmware,
        })
    }

    pub fn is_warming_up(&self) -> bool {
        self.device.contains(DeviceStatus::WARMING_UP)
    }

    pub fn report_for(&self, kind: ExtensionKind) -> &ExtensionReport {
        match kind {
            ExtensionKind::Flatbed => &self.flatbed,
            ExtensionKind::Adf => &self.adf,
            ExtensionKind::TransparencyUnit => &self.tpu,
        }
    }
}

fn extension_at(
    payload: &[u8],
    kind: ExtensionKind,
    status_at: usize,
    pixels_at: usize,
) -> ExtensionReport {
    let status = ExtStatus::from_bits_retain(payload[status_at]);
    let width = u16::from_le_bytes([payload[pixels_at], payload[pixels_at + 1]]);
    let height = u16::from_le_bytes([payload[pixels_at + 2], payload[pixels_at + 3]]);
    ExtensionReport {
        kind,
        status,
        max_pixels: (width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn sample_payload() -> Vec<u8> {
        let mut p = vec![0u8; EXT_STATUS_SIZE];
        p[0] = 0x01; // push button
        p[1] = 0x80 | 0x08; // ADF installed, paper empty
        p[2..4].copy_from_slice(&5100u16.to_le_bytes());
        p[4..6].copy_from_slice(&7020u16.to_le_bytes());
        p[11] = 0x80 | 0x40; // flatbed installed and enabled
        p[12..14].copy_from_slice(&10200u16.to_le_bytes());
        p[14..16].copy_from_slice(&14040u16.to_le_bytes());
        p[26..34].copy_from_slice(b"GT-7000 ");
        for b in &mut p[34..42] {
            *b = b' ';
        }
        p
    }

    #[test]
    fn test_decode_report() {
        let report = StatusReport::decode(&sample_payload()).unwrap();

        assert_eq!(report.firmware, "GT-7000");
        assert!(report.device.contains(DeviceStatus::PUSH_BUTTON));
        assert!(!report.is_warming_up());

        assert!(report.adf.is_installed());
        assert!(report.adf.status.contains(ExtStatus::PAPER_EMPTY));
        assert_eq!(report.adf.max_pixels, (5100, 7020));

        assert!(report.flatbed.is_installed());
        assert_eq!(report.flatbed.max_pixels, (10200, 14040));

        assert!(!report.tpu.is_installed());
    }

    #[test]
    fn test_decode_is_idempotent() {
        let payload = sample_payload();
        let first = StatusReport::decode(&payload).unwrap();
        let second = StatusReport::decode(&payload).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_short_payload() {
        let result = StatusReport::decode(&[0u8; 10]);
        assert!(matches!(result, Err(Error::ReplyTooShort { .. })));
    }

    #[test]
    fn test_warming_up_bit() {
        let mut payload = sample_payload();
        payload[0] |= 0x02;
        let report = StatusReport::decode(&payload).unwrap();
        assert!(report.is_warming_up());
    }
}
