//! Color-shuffle reassembly
//!
//! On sensors whose red, green and blue rows are physically separated,
//! the channels of one image line arrive on different raw lines: raw
//! line `i` carries red for line `i`, green for line `i - L` and blue
//! for line `i - 2L`, where `L` is the line distance at the current
//! resolution. Reassembly keeps a ring of `2L + 1` raw lines and emits
//! output line `j` once raw line `j + 2L` has arrived, so a scan of `H`
//! raw lines yields `H - 2L` complete lines; the session trims the
//! requested height accordingly.

use std::collections::VecDeque;

/// Streaming reassembler for offset RGB rows
pub struct ColorShuffler {
    line_distance: usize,
    bytes_per_line: usize,
    ring: VecDeque<Vec<u8>>,
    raw_lines: usize,
    emitted: usize,
}

impl ColorShuffler {
    /// `pixels_per_line` at 8 bits per channel, interleaved RGB
    pub fn new(line_distance: usize, pixels_per_line: usize) -> Self {
        Self {
            line_distance,
            bytes_per_line: pixels_per_line * 3,
            ring: VecDeque::with_capacity(2 * line_distance + 1),
            raw_lines: 0,
            emitted: 0,
        }
    }

    /// Raw bytes of one complete scan line
    pub fn bytes_per_line(&self) -> usize {
        self.bytes_per_line
    }

    /// Lines emitted so far
    pub fn lines_emitted(&self) -> usize {
        self.emitted
    }

    /// Feed one raw line; appends zero or one reassembled lines to `out`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `line` is not exactly one line long.
    pub fn push_line(&mut self, line: &[u8], out: &mut Vec<u8>) {
        debug_assert_eq!(line.len(), self.bytes_per_line);

        if self.line_distance == 0 {
            out.extend_from_slice(line);
            self.raw_lines += 1;
            self.emitted += 1;
            return;
        }

        let window = 2 * self.line_distance + 1;
        self.ring.push_back(line.to_vec());
        if self.ring.len() > window {
            self.ring.pop_front();
        }
        self.raw_lines += 1;

        // Output line j is complete once raw line j + 2L is in
        if self.raw_lines < window {
            return;
        }

        let red = &self.ring[0];
        let green = &self.ring[self.line_distance];
        let blue = &self.ring[2 * self.line_distance];

        let start = out.len();
        out.resize(start + self.bytes_per_line, 0);
        let dst = &mut out[start..];
        for p in 0..self.bytes_per_line / 3 {
            dst[3 * p] = red[3 * p];
            dst[3 * p + 1] = green[3 * p + 1];
            dst[3 * p + 2] = blue[3 * p + 2];
        }
        self.emitted += 1;
    }

    /// Lines a scan of `raw_height` raw lines will actually deliver
    pub fn output_lines(&self, raw_height: usize) -> usize {
        raw_height.saturating_sub(2 * self.line_distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Build one raw line whose channels carry per-line markers the way
    /// an offset sensor would: red from line `i`, green from `i - L`,
    /// blue from `i - 2L`.
    fn raw_line(i: usize, distance: usize, width: usize) -> Vec<u8> {
        let marker = |line: isize| -> u8 { (line.rem_euclid(251)) as u8 };
        let mut line = vec![0u8; width * 3];
        for p in 0..width {
            line[3 * p] = marker(i as isize);
            line[3 * p + 1] = marker(i as isize - distance as isize);
            line[3 * p + 2] = marker(i as isize - 2 * distance as isize);
        }
        line
    }

    #[test]
    fn test_markers_realign() {
        let distance = 4;
        let width = 8;
        let raw_height = 32;

        let mut shuffler = ColorShuffler::new(distance, width);
        let mut out = Vec::new();
        for i in 0..raw_height {
            shuffler.push_line(&raw_line(i, distance, width), &mut out);
        }

        // Exactly 2L lines trimmed
        let lines = out.len() / (width * 3);
        assert_eq!(lines, raw_height - 2 * distance);
        assert_eq!(shuffler.output_lines(raw_height), lines);

        // Every output line has all three markers aligned
        for j in 0..lines {
            let line = &out[j * width * 3..(j + 1) * width * 3];
            let expected = (j % 251) as u8;
            for p in 0..width {
                assert_eq!(line[3 * p], expected, "red, line {j}");
                assert_eq!(line[3 * p + 1], expected, "green, line {j}");
                assert_eq!(line[3 * p + 2], expected, "blue, line {j}");
            }
        }
    }

    #[test]
    fn test_zero_distance_is_passthrough() {
        let mut shuffler = ColorShuffler::new(0, 4);
        let mut out = Vec::new();
        let line: Vec<u8> = (0..12).collect();
        shuffler.push_line(&line, &mut out);

        assert_eq!(out, line);
        assert_eq!(shuffler.lines_emitted(), 1);
        assert_eq!(shuffler.output_lines(100), 100);
    }

    #[test]
    fn test_emission_is_delayed_by_window() {
        let distance = 2;
        let mut shuffler = ColorShuffler::new(distance, 4);
        let mut out = Vec::new();

        for i in 0..(2 * distance) {
            shuffler.push_line(&raw_line(i, distance, 4), &mut out);
            assert!(out.is_empty(), "no output before the window fills");
        }
        shuffler.push_line(&raw_line(2 * distance, distance, 4), &mut out);
        assert_eq!(out.len(), 12);
    }
}
