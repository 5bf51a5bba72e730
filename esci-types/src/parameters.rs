//! Scan geometry and pixel-format descriptors

use std::fmt;

use crate::error::{Error, Result};

/// Pixel interpretation of scanned data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// 1-bit black and white
    Monochrome,

    /// Single-channel gray
    #[default]
    Grayscale,

    /// Three-channel color, R/G/B per pixel
    Rgb,
}

impl ColorMode {
    /// Number of color channels per pixel
    pub fn channels(self) -> usize {
        match self {
            Self::Monochrome | Self::Grayscale => 1,
            Self::Rgb => 3,
        }
    }
}

/// Format descriptor attached to the bytes of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParameters {
    /// Pixels per scan line
    pub pixels_per_line: u32,

    /// Number of scan lines delivered to the caller
    pub lines: u32,

    /// Bits per channel (1, 8 or 16)
    pub depth: u8,

    /// Color interpretation
    pub color_mode: ColorMode,
}

impl ScanParameters {
    /// Bytes occupied by one complete scan line
    pub fn bytes_per_line(&self) -> usize {
        let channels = self.color_mode.channels();
        match self.depth {
            1 => channels * (self.pixels_per_line as usize).div_ceil(8),
            8 => channels * self.pixels_per_line as usize,
            16 => channels * self.pixels_per_line as usize * 2,
            _ => 0,
        }
    }

    /// Total image size in bytes
    pub fn total_bytes(&self) -> usize {
        self.bytes_per_line() * self.lines as usize
    }
}

/// Scan window in 1/100 millimetre units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanArea {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl ScanArea {
    /// Hundredths of a millimetre per inch
    const HMM_PER_INCH: u64 = 2540;

    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Validation("scan area must be non-empty".into()));
        }
        Ok(Self {
            left,
            top,
            width,
            height,
        })
    }

    /// Convert a 1/100 mm length to pixels at the given resolution,
    /// rounding up so the area is never clipped short.
    pub fn pixels(hundredth_mm: u32, dpi: u16) -> u32 {
        let n = hundredth_mm as u64 * dpi as u64;
        n.div_ceil(Self::HMM_PER_INCH) as u32
    }

    pub fn width_pixels(&self, dpi: u16) -> u32 {
        Self::pixels(self.width, dpi)
    }

    pub fn height_pixels(&self, dpi: u16) -> u32 {
        Self::pixels(self.height, dpi)
    }

    pub fn left_pixels(&self, dpi: u16) -> u32 {
        Self::pixels(self.left, dpi)
    }

    pub fn top_pixels(&self, dpi: u16) -> u32 {
        Self::pixels(self.top, dpi)
    }
}

impl fmt::Display for ScanArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{} (1/100 mm)",
            self.width, self.height, self.left, self.top
        )
    }
}

/// Resolutions a device advertises, either a discrete list or a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionTable {
    List(Vec<u16>),
    Range { min: u16, max: u16 },
}

impl ResolutionTable {
    /// Check whether the device can scan at `dpi`
    pub fn supports(&self, dpi: u16) -> bool {
        match self {
            Self::List(list) => list.contains(&dpi),
            Self::Range { min, max } => (*min..=*max).contains(&dpi),
        }
    }

    /// Closest supported resolution at or above `dpi`, if any
    pub fn at_least(&self, dpi: u16) -> Option<u16> {
        match self {
            Self::List(list) => list.iter().copied().filter(|&r| r >= dpi).min(),
            Self::Range { min, max } => {
                if dpi > *max {
                    None
                } else {
                    Some(dpi.max(*min))
                }
            }
        }
    }
}

impl Default for ResolutionTable {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_area_pixels_round_up() {
        // 100 mm at 300 dpi: 100 / 25.4 * 300 = 1181.10..., rounds to 1182
        assert_eq!(ScanArea::pixels(10000, 300), 1182);
        // One inch exactly
        assert_eq!(ScanArea::pixels(2540, 300), 300);
        assert_eq!(ScanArea::pixels(0, 300), 0);
    }

    #[test]
    fn test_area_rejects_empty() {
        assert!(ScanArea::new(0, 0, 0, 100).is_err());
        assert!(ScanArea::new(0, 0, 100, 100).is_ok());
    }

    #[test]
    fn test_bytes_per_line() {
        let p = ScanParameters {
            pixels_per_line: 100,
            lines: 10,
            depth: 8,
            color_mode: ColorMode::Rgb,
        };
        assert_eq!(p.bytes_per_line(), 300);
        assert_eq!(p.total_bytes(), 3000);

        let mono = ScanParameters {
            pixels_per_line: 12,
            lines: 1,
            depth: 1,
            color_mode: ColorMode::Monochrome,
        };
        assert_eq!(mono.bytes_per_line(), 2);
    }

    #[test]
    fn test_resolution_table() {
        let list = ResolutionTable::List(vec![150, 300, 600]);
        assert!(list.supports(300));
        assert!(!list.supports(200));
        assert_eq!(list.at_least(200), Some(300));
        assert_eq!(list.at_least(700), None);

        let range = ResolutionTable::Range { min: 50, max: 1600 };
        assert!(range.supports(1234));
        assert_eq!(range.at_least(25), Some(50));
        assert_eq!(range.at_least(1601), None);
    }
}
