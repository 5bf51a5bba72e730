//! The 64-byte extended-parameter block (FS W)
//!
//! Devices on the extended command set take their whole scan setup in
//! one write instead of a round-trip per discrete command. Each field
//! lives at a fixed offset keyed by the ESC/I sub-command letter it
//! replaces:
//!
//! | letter | offset | size | field                        |
//! |--------|--------|------|------------------------------|
//! | `R`    | 0      | 8    | resolution x, y (u32 LE ×2)  |
//! | `A`    | 8      | 16   | offset x/y, width, height    |
//! | `C`    | 24     | 1    | color mode                   |
//! | `D`    | 25     | 1    | bit depth                    |
//! | `g`    | 26     | 1    | scan speed                   |
//! | `e`    | 27     | 1    | active extension             |
//! | `d`    | 28     | 1    | lines per block              |
//! | `L`    | 29     | 1    | brightness (i8)              |
//! | `Z`    | 30     | 1    | gamma table selector         |
//! | `B`    | 31     | 1    | halftone mode                |
//! |        | 32..64 |      | reserved, zero               |

use crate::PARAMETER_BLOCK_SIZE;

/// Field offsets keyed by the sub-command letter each one replaces
mod offsets {
    pub const RESOLUTION: usize = 0;
    pub const AREA: usize = 8;
    pub const COLOR_MODE: usize = 24;
    pub const DEPTH: usize = 25;
    pub const SPEED: usize = 26;
    pub const EXTENSION: usize = 27;
    pub const LINE_COUNT: usize = 28;
    pub const BRIGHTNESS: usize = 29;
    pub const GAMMA: usize = 30;
    pub const HALFTONE: usize = 31;
}

/// In-memory image of the 64-byte scratch region
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ParameterBlock {
    raw: [u8; PARAMETER_BLOCK_SIZE],
}

impl ParameterBlock {
    pub fn new() -> Self {
        Self {
            raw: [0; PARAMETER_BLOCK_SIZE],
        }
    }

    /// Rebuild from bytes read back with FS S
    pub fn from_bytes(raw: [u8; PARAMETER_BLOCK_SIZE]) -> Self {
        Self { raw }
    }

    /// The exact 64 bytes written with FS W
    pub fn as_bytes(&self) -> &[u8; PARAMETER_BLOCK_SIZE] {
        &self.raw
    }

    pub fn set_resolution(&mut self, x_dpi: u32, y_dpi: u32) {
        self.put_u32(offsets::RESOLUTION, x_dpi);
        self.put_u32(offsets::RESOLUTION + 4, y_dpi);
    }

    pub fn resolution(&self) -> (u32, u32) {
        (
            self.get_u32(offsets::RESOLUTION),
            self.get_u32(offsets::RESOLUTION + 4),
        )
    }

    /// Scan window in pixels at the selected resolution
    pub fn set_scan_area(&mut self, left: u32, top: u32, width: u32, height: u32) {
        self.put_u32(offsets::AREA, left);
        self.put_u32(offsets::AREA + 4, top);
        self.put_u32(offsets::AREA + 8, width);
        self.put_u32(offsets::AREA + 12, height);
    }

    pub fn scan_area(&self) -> (u32, u32, u32, u32) {
        (
            self.get_u32(offsets::AREA),
            self.get_u32(offsets::AREA + 4),
            self.get_u32(offsets::AREA + 8),
            self.get_u32(offsets::AREA + 12),
        )
    }

    pub fn set_color_mode(&mut self, mode: u8) {
        self.raw[offsets::COLOR_MODE] = mode;
    }

    pub fn color_mode(&self) -> u8 {
        self.raw[offsets::COLOR_MODE]
    }

    pub fn set_depth(&mut self, depth: u8) {
        self.raw[offsets::DEPTH] = depth;
    }

    pub fn depth(&self) -> u8 {
        self.raw[offsets::DEPTH]
    }

    pub fn set_speed(&mut self, speed: u8) {
        self.raw[offsets::SPEED] = speed;
    }

    pub fn set_extension(&mut self, selector: u8) {
        self.raw[offsets::EXTENSION] = selector;
    }

    pub fn extension(&self) -> u8 {
        self.raw[offsets::EXTENSION]
    }

    pub fn set_line_count(&mut self, lines: u8) {
        self.raw[offsets::LINE_COUNT] = lines;
    }

    pub fn line_count(&self) -> u8 {
        self.raw[offsets::LINE_COUNT]
    }

    pub fn set_brightness(&mut self, brightness: i8) {
        self.raw[offsets::BRIGHTNESS] = brightness as u8;
    }

    pub fn brightness(&self) -> i8 {
        self.raw[offsets::BRIGHTNESS] as i8
    }

    pub fn set_gamma(&mut self, selector: u8) {
        self.raw[offsets::GAMMA] = selector;
    }

    pub fn set_halftone(&mut self, mode: u8) {
        self.raw[offsets::HALFTONE] = mode;
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn get_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.raw[offset..offset + 4].try_into().unwrap())
    }
}

impl Default for ParameterBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParameterBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterBlock")
            .field("resolution", &self.resolution())
            .field("area", &self.scan_area())
            .field("color_mode", &self.color_mode())
            .field("depth", &self.depth())
            .field("line_count", &self.line_count())
            .finish()
    }
}
