//! Identity reply decoding and the firmware quirk table
//!
//! The identity payload opens with a two-character command level and
//! continues with tagged entries:
//!
//! ```text
//! 'R' + u16 LE   one supported resolution (first entry is the base)
//! 'A' + u16 LE ×2   maximum width and height in pixels at base resolution
//! 'L' + u16 LE   optical color-row offset in lines at base resolution
//! ```

use bytes::Buf;
use tracing::{debug, warn};

use esci_types::ResolutionTable;

use crate::error::{Error, Result};

/// Decoded identity reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Two-character command level, e.g. `B7` or `D1`
    pub command_level: [u8; 2],

    /// Advertised resolutions; first listed is the base resolution
    pub resolutions: ResolutionTable,

    /// Base (optical) resolution in dpi
    pub base_resolution: u16,

    /// Maximum scan extent in pixels at base resolution
    pub max_pixels: (u16, u16),

    /// Color-row line offset at base resolution, zero when rows are
    /// not physically separated on the sensor
    pub optical_offset: u16,
}

impl Identity {
    /// Devices whose command level starts with `D` speak the extended
    /// (FS) command set; the decision holds for the life of the device.
    pub fn uses_extended_commands(&self) -> bool {
        self.command_level[0] == b'D'
    }

    /// Decode an identity payload, applying any firmware quirk first.
    ///
    /// `firmware` is the name learned from extended status; a handful of
    /// hardware revisions report known-wrong bytes here, fixed up before
    /// decoding (see [`QUIRKS`]).
    pub fn decode(payload: &[u8], firmware: &str) -> Result<Self> {
        let mut raw = payload.to_vec();
        apply_quirks(&mut raw, firmware);

        if raw.len() < 2 {
            return Err(Error::ReplyTooShort {
                expected: 2,
                actual: raw.len(),
            });
        }

        let command_level = [raw[0], raw[1]];
        let mut buf = &raw[2..];
        let mut offset = 2usize;

        let mut resolutions = Vec::new();
        let mut max_pixels = (0u16, 0u16);
        let mut optical_offset = 0u16;

        while buf.has_remaining() {
            let tag = buf.get_u8();
            offset += 1;
            match tag {
                b'R' => {
                    if buf.remaining() < 2 {
                        return Err(Error::MalformedIdentity { tag: 'R', offset });
                    }
                    resolutions.push(buf.get_u16_le());
                    offset += 2;
                }
                b'A' => {
                    if buf.remaining() < 4 {
                        return Err(Error::MalformedIdentity { tag: 'A', offset });
                    }
                    max_pixels = (buf.get_u16_le(), buf.get_u16_le());
                    offset += 4;
                }
                b'L' => {
                    if buf.remaining() < 2 {
                        return Err(Error::MalformedIdentity { tag: 'L', offset });
                    }
                    optical_offset = buf.get_u16_le();
                    offset += 2;
                }
                other => {
                    // Unknown tags carry a u16 argument on every known
                    // firmware; skip rather than fail.
                    warn!("Skipping unknown identity tag 0x{:02X}", other);
                    if buf.remaining() < 2 {
                        return Err(Error::MalformedIdentity {
                            tag: other as char,
                            offset,
                        });
                    }
                    buf.advance(2);
                    offset += 2;
                }
            }
        }

        let base_resolution = resolutions.first().copied().unwrap_or(0);

        debug!(
            level = %String::from_utf8_lossy(&command_level),
            base = base_resolution,
            resolutions = resolutions.len(),
            "Decoded identity"
        );

        Ok(Self {
            command_level,
            resolutions: ResolutionTable::List(resolutions),
            base_resolution,
            max_pixels,
            optical_offset,
        })
    }
}

/// One per-firmware byte fix-up applied to a raw identity payload
#[derive(Debug, Copy, Clone)]
pub struct Quirk {
    /// Firmware name exactly as reported in extended status
    pub firmware: &'static str,

    /// (offset, byte) patches written into the raw payload
    pub patches: &'static [(usize, u8)],
}

/// Known firmware quirks.
///
/// These encode real hardware bugs: the listed revisions report a wrong
/// command level or base resolution in the identity reply. The patches
/// reproduce what each device should have sent; the underlying quirks
/// are kept as shipped, not corrected further.
pub const QUIRKS: &[Quirk] = &[
    // Report level B5 but implement the full D1 extended set
    Quirk {
        firmware: "ES-9000H",
        patches: &[(0, b'D'), (1, b'1')],
    },
    Quirk {
        firmware: "GT-30000",
        patches: &[(0, b'D'), (1, b'1')],
    },
    // First resolution entry reads 360 dpi but the optics are 600 dpi
    Quirk {
        firmware: "Perfection610",
        patches: &[(3, 0x58), (4, 0x02)],
    },
];

fn apply_quirks(raw: &mut [u8], firmware: &str) {
    for quirk in QUIRKS {
        if quirk.firmware != firmware {
            continue;
        }
        debug!(firmware, "Applying identity quirk");
        for &(offset, byte) in quirk.patches {
            if let Some(slot) = raw.get_mut(offset) {
                *slot = byte;
            } else {
                warn!(
                    firmware,
                    offset, "Quirk patch offset beyond identity payload"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sample_payload() -> Vec<u8> {
        let mut p = vec![b'B', b'7'];
        for res in [300u16, 600, 1200] {
            p.push(b'R');
            p.extend_from_slice(&res.to_le_bytes());
        }
        p.push(b'A');
        p.extend_from_slice(&10200u16.to_le_bytes());
        p.extend_from_slice(&14040u16.to_le_bytes());
        p.push(b'L');
        p.extend_from_slice(&8u16.to_le_bytes());
        p
    }

    #[test]
    fn test_decode_identity() {
        let id = Identity::decode(&sample_payload(), "GT-7000").unwrap();

        assert_eq!(id.command_level, [b'B', b'7']);
        assert_eq!(id.base_resolution, 300);
        assert_eq!(
            id.resolutions,
            ResolutionTable::List(vec![300, 600, 1200])
        );
        assert_eq!(id.max_pixels, (10200, 14040));
        assert_eq!(id.optical_offset, 8);
        assert!(!id.uses_extended_commands());
    }

    #[test]
    fn test_quirk_patches_command_level() {
        let id = Identity::decode(&sample_payload(), "ES-9000H").unwrap();

        assert_eq!(id.command_level, [b'D', b'1']);
        assert!(id.uses_extended_commands());
        // Rest of the payload decodes unchanged
        assert_eq!(id.base_resolution, 300);
    }

    #[test]
    fn test_quirk_only_for_matching_firmware() {
        let plain = Identity::decode(&sample_payload(), "GT-7000").unwrap();
        assert_eq!(plain.command_level, [b'B', b'7']);
    }

    #[test]
    fn test_truncated_entry_fails() {
        let mut p = sample_payload();
        p.push(b'R'); // tag with no argument bytes
        let result = Identity::decode(&p, "GT-7000");
        assert!(matches!(result, Err(Error::MalformedIdentity { tag: 'R', .. })));
    }

    #[test]
    fn test_too_short_payload() {
        assert!(matches!(
            Identity::decode(&[b'B'], "GT-7000"),
            Err(Error::ReplyTooShort { .. })
        ));
    }

    #[test]
    fn test_unknown_tag_skipped() {
        let mut p = sample_payload();
        p.push(b'Q');
        p.extend_from_slice(&7u16.to_le_bytes());
        let id = Identity::decode(&p, "GT-7000").unwrap();
        assert_eq!(id.base_resolution, 300);
    }

    proptest! {
        // Arbitrary reply bytes either decode or fail cleanly
        #[test]
        fn prop_decode_arbitrary_bytes(
            payload in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let _ = Identity::decode(&payload, "GT-7000");
        }
    }
}
