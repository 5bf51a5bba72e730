//! Scan-session state machine
//!
//! A [`ScanSession`] drives one scan end to end: it programs the
//! device from a set of [`ScanOptions`], starts the transfer and then
//! streams image bytes to the caller block by block. Devices with
//! physically separated color rows are reassembled on the fly through
//! a [`ColorShuffler`]; the caller always sees pixel-aligned lines.
//!
//! Cancellation is a flag checked at every await point of the stream:
//! [`ScanSession::cancel`] never touches the wire itself, the session
//! sends the cancel byte in place of the next block acknowledgement.

use std::time::Duration;

use tracing::{debug, info, warn};

use esci_types::{ColorMode, ScanArea, ScanParameters};

use crate::device::{Device, BLOCK_RETRY_LIMIT};
use crate::error::{Error, Result};
use crate::shuffle::ColorShuffler;

/// Color-mode argument bytes for the setup command
mod color_code {
    pub const MONOCHROME: u8 = 0x00;
    pub const GRAYSCALE: u8 = 0x08;
    /// Line-sequential RGB
    pub const RGB: u8 = 0x13;
}

/// Extension selector argument bytes
mod source_code {
    pub const FLATBED: u8 = 0x00;
    pub const ADF: u8 = 0x01;
    pub const TPU: u8 = 0x02;
}

/// Which scan source the session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanSource {
    #[default]
    Flatbed,
    Adf,
    TransparencyUnit,
}

impl ScanSource {
    fn selector(self) -> u8 {
        match self {
            Self::Flatbed => source_code::FLATBED,
            Self::Adf => source_code::ADF,
            Self::TransparencyUnit => source_code::TPU,
        }
    }
}

/// Where in its lifecycle a session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Options set, device not yet programmed
    Setup,

    /// Transfer running, blocks being consumed
    Streaming,

    /// All image data delivered
    Complete,

    /// Cancelled by the caller or the device
    Cancelled,
}

/// Everything a caller chooses about one scan
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Resolution in dpi, both axes
    pub resolution: u16,

    /// Scan window in 1/100 mm
    pub area: ScanArea,

    pub color_mode: ColorMode,

    /// Bits per channel (1, 8 or 16)
    pub depth: u8,

    pub source: ScanSource,

    /// Signed brightness adjustment around zero
    pub brightness: i8,

    /// Scan lines per transfer block
    pub lines_per_block: u8,

    /// Bound on the warm-up wait
    pub warmup_timeout: Duration,

    /// Interval between warm-up status polls
    pub warmup_poll: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            resolution: 300,
            // A4
            area: ScanArea {
                left: 0,
                top: 0,
                width: 21000,
                height: 29700,
            },
            color_mode: ColorMode::Grayscale,
            depth: 8,
            source: ScanSource::Flatbed,
            brightness: 0,
            lines_per_block: 16,
            warmup_timeout: Duration::from_secs(120),
            warmup_poll: Duration::from_secs(1),
        }
    }
}

impl ScanOptions {
    fn validate(&self) -> Result<()> {
        if !matches!(self.depth, 1 | 8 | 16) {
            return Err(Error::NotSupported(format!(
                "unsupported bit depth {}",
                self.depth
            )));
        }
        if self.resolution == 0 {
            return Err(Error::NotSupported("resolution must be non-zero".into()));
        }
        if self.area.width == 0 || self.area.height == 0 {
            return Err(Error::NotSupported("scan area must be non-empty".into()));
        }
        if self.lines_per_block == 0 {
            return Err(Error::NotSupported(
                "lines per block must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// One scan from setup to the last delivered byte
pub struct ScanSession {
    device: Device,
    options: ScanOptions,
    state: SessionState,

    /// Format of the delivered image, fixed once streaming starts
    parameters: Option<ScanParameters>,
    shuffler: Option<ColorShuffler>,

    /// Decoded output not yet copied to the caller
    pending: Vec<u8>,
    cursor: usize,

    /// Partial raw line carried across block boundaries
    line_buf: Vec<u8>,
    bytes_per_raw_line: usize,

    cancel_requested: bool,
    all_data_fetched: bool,

    /// A non-final block was consumed and the next one has not been
    /// acknowledged yet
    ack_pending: bool,

    retries: usize,
    finished: bool,
}

impl ScanSession {
    /// Pair a device with a set of options. Validates the options but
    /// performs no I/O; the device may be uninquired at this point.
    pub fn new(device: Device, options: ScanOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            device,
            options,
            state: SessionState::Setup,
            parameters: None,
            shuffler: None,
            pending: Vec::new(),
            cursor: 0,
            line_buf: Vec::new(),
            bytes_per_raw_line: 0,
            cancel_requested: false,
            all_data_fetched: false,
            ack_pending: false,
            retries: 0,
            finished: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Format of the image being delivered; set once streaming starts
    pub fn parameters(&self) -> Option<&ScanParameters> {
        self.parameters.as_ref()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Hand the device back, e.g. to set up the next sheet of an ADF
    /// batch with a fresh session. Callers should run
    /// [`ScanSession::finish`] first so a still-streaming transfer is
    /// aborted and the carriage lock released.
    pub fn into_device(self) -> Device {
        self.device
    }

    /// Request cancellation. Takes effect at the next stream await
    /// point; safe to call from any state, any number of times.
    pub fn cancel(&mut self) {
        debug!("Cancellation requested");
        self.cancel_requested = true;
    }

    /// Program the device and start the transfer
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Setup {
            return Err(Error::NotSupported("session already started".into()));
        }
        if self.cancel_requested {
            self.state = SessionState::Cancelled;
            return Err(Error::Cancelled);
        }

        if !self.device.is_inquired() {
            self.device.inquire().await?;
        }
        self.device
            .wait_until_ready(self.options.warmup_timeout, self.options.warmup_poll)
            .await?;
        self.device.lock().await?;
        self.device.initialize().await?;

        let dpi = self.resolve_resolution()?;
        let selector = self.resolve_source()?;
        let geometry = self.resolve_geometry(dpi)?;
        self.program_device(dpi, selector, &geometry).await?;

        if self.options.source == ScanSource::Adf {
            self.device.load_paper().await?;
        }

        self.parameters = Some(ScanParameters {
            pixels_per_line: geometry.width as u32,
            lines: geometry.height as u32,
            depth: self.options.depth,
            color_mode: self.options.color_mode,
        });
        self.bytes_per_raw_line = self
            .parameters
            .as_ref()
            .map(ScanParameters::bytes_per_line)
            .unwrap_or(0);
        self.shuffler = (geometry.line_distance > 0)
            .then(|| ColorShuffler::new(geometry.line_distance, geometry.width as usize));

        info!(
            dpi,
            width = geometry.width,
            height = geometry.height,
            shuffle = geometry.line_distance,
            "Starting scan"
        );
        self.device.start_scan().await?;
        self.state = SessionState::Streaming;
        Ok(())
    }

    /// Stream decoded image bytes into `buf`.
    ///
    /// Returns zero exactly once the whole image has been delivered.
    /// After [`ScanSession::cancel`] the next call performs the wire
    /// cancellation and fails with [`Error::Cancelled`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.cursor < self.pending.len() {
                let n = (self.pending.len() - self.cursor).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.cursor..self.cursor + n]);
                self.cursor += n;
                if self.cursor == self.pending.len() {
                    self.pending.clear();
                    self.cursor = 0;
                }
                return Ok(n);
            }

            match self.state {
                SessionState::Streaming => self.fetch_block().await?,
                SessionState::Complete => return Ok(0),
                SessionState::Cancelled => return Err(Error::Cancelled),
                SessionState::Setup => {
                    return Err(Error::NotSupported("session not started".into()))
                }
            }
        }
    }

    /// Tear the session down: abort a running transfer, eject a loaded
    /// sheet and release the carriage lock. Idempotent.
    pub async fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.state == SessionState::Streaming {
            // Mid-stream teardown aborts the transfer first
            if let Err(e) = self.cancel_on_wire().await {
                warn!("Cancel during teardown failed: {e}");
            }
        }
        if let Err(e) = self.device.unlock().await {
            warn!("Unlock during teardown failed: {e}");
        }
        self.finished = true;
        Ok(())
    }

    /// Clamp to a resolution the device actually supports
    fn resolve_resolution(&self) -> Result<u16> {
        let table = &self.device.resolutions;
        if table.supports(self.options.resolution) {
            return Ok(self.options.resolution);
        }
        table.at_least(self.options.resolution).ok_or_else(|| {
            Error::NotSupported(format!("no resolution at or above {} dpi", self.options.resolution))
        })
    }

    fn resolve_source(&self) -> Result<u8> {
        let present = match self.options.source {
            ScanSource::Flatbed => self.device.flatbed.is_some(),
            ScanSource::Adf => self.device.adf.is_some(),
            ScanSource::TransparencyUnit => self.device.tpu.is_some(),
        };
        if !present {
            return Err(Error::NotSupported(format!(
                "scan source {:?} not installed",
                self.options.source
            )));
        }
        Ok(self.options.source.selector())
    }

    /// Pixel geometry of the transfer at the chosen resolution.
    ///
    /// With separated color rows the device is asked for `2L` extra
    /// lines so the shuffler can deliver the full requested height.
    fn resolve_geometry(&self, dpi: u16) -> Result<Geometry> {
        let area = &self.options.area;
        let to_u16 = |px: u32| -> Result<u16> {
            px.try_into()
                .map_err(|_| Error::NotSupported(format!("scan extent {px} px too large")))
        };

        let line_distance = self.line_distance(dpi);
        let width = to_u16(area.width_pixels(dpi))?;
        let height = to_u16(area.height_pixels(dpi))?;
        let raw_height = to_u16(area.height_pixels(dpi) + 2 * line_distance as u32)?;

        Ok(Geometry {
            left: to_u16(area.left_pixels(dpi))?,
            top: to_u16(area.top_pixels(dpi))?,
            width,
            height,
            raw_height,
            line_distance,
        })
    }

    /// Row offset in lines at the selected resolution; zero unless the
    /// scan is 8-bit color on a device with separated rows
    fn line_distance(&self, dpi: u16) -> usize {
        if self.options.color_mode != ColorMode::Rgb || self.options.depth != 8 {
            return 0;
        }
        if self.device.base_resolution == 0 {
            return 0;
        }
        (self.device.optical_offset as u32 * dpi as u32 / self.device.base_resolution as u32)
            as usize
    }

    async fn program_device(&mut self, dpi: u16, selector: u8, geo: &Geometry) -> Result<()> {
        let color = match self.options.color_mode {
            ColorMode::Monochrome => color_code::MONOCHROME,
            ColorMode::Grayscale => color_code::GRAYSCALE,
            ColorMode::Rgb => color_code::RGB,
        };

        if self.device.uses_extended_commands() {
            let p = &mut self.device.params;
            p.set_resolution(dpi as u32, dpi as u32);
            p.set_scan_area(
                geo.left as u32,
                geo.top as u32,
                geo.width as u32,
                geo.raw_height as u32,
            );
            p.set_color_mode(color);
            p.set_depth(self.options.depth);
            p.set_extension(selector);
            p.set_line_count(self.options.lines_per_block);
            p.set_brightness(self.options.brightness);
            self.device.upload_parameters().await
        } else {
            if selector != source_code::FLATBED {
                self.device.control_extension(selector).await?;
            }
            self.device.set_resolution(dpi, dpi).await?;
            self.device
                .set_scan_area(geo.left, geo.top, geo.width, geo.raw_height)
                .await?;
            self.device.set_color_mode(color).await?;
            self.device.set_data_format(self.options.depth).await?;
            self.device.set_line_count(self.options.lines_per_block).await?;
            self.device.set_brightness(self.options.brightness).await
        }
    }

    /// Pull the next block off the wire and decode it into `pending`
    async fn fetch_block(&mut self) -> Result<()> {
        if self.all_data_fetched {
            self.state = SessionState::Complete;
            return Ok(());
        }

        // The cancel byte goes out in place of the acknowledgement
        if self.cancel_requested {
            self.cancel_on_wire().await?;
            return Err(Error::Cancelled);
        }

        if self.ack_pending {
            self.device.request_next_block().await?;
            self.ack_pending = false;
        }

        let block = loop {
            match self.device.read_image_block().await {
                Ok(block) => break block,
                Err(Error::Transport(e)) if self.retries < BLOCK_RETRY_LIMIT => {
                    self.retries += 1;
                    warn!(
                        attempt = self.retries,
                        "Transient block read failure, retrying: {e}"
                    );
                    self.device.request_next_block().await?;
                }
                Err(e) => return Err(e),
            }
        };
        // The retry budget is per block read, not per session
        self.retries = 0;

        if block.cancel_ack {
            debug!("Device acknowledged cancellation in-band");
            self.state = SessionState::Cancelled;
            self.eject_if_adf().await;
            return Err(Error::Cancelled);
        }

        self.decode_block(&block.data);
        if block.end_of_page {
            self.all_data_fetched = true;
        } else {
            self.ack_pending = true;
        }
        Ok(())
    }

    /// Split a block payload into raw lines and run each through the
    /// shuffler (or pass it straight to the output)
    fn decode_block(&mut self, data: &[u8]) {
        if self.bytes_per_raw_line == 0 {
            self.pending.extend_from_slice(data);
            return;
        }
        self.line_buf.extend_from_slice(data);

        let mut offset = 0;
        while self.line_buf.len() - offset >= self.bytes_per_raw_line {
            let line = &self.line_buf[offset..offset + self.bytes_per_raw_line];
            match self.shuffler.as_mut() {
                Some(shuffler) => shuffler.push_line(line, &mut self.pending),
                None => self.pending.extend_from_slice(line),
            }
            offset += self.bytes_per_raw_line;
        }
        self.line_buf.drain(..offset);
    }

    /// Abort the transfer on the wire and reset the device state
    async fn cancel_on_wire(&mut self) -> Result<()> {
        self.device.cancel_scan().await?;
        self.state = SessionState::Cancelled;
        self.eject_if_adf().await;
        // Leave no programmed state behind for the next session
        if let Err(e) = self.device.initialize().await {
            warn!("Reset after cancel failed: {e}");
        }
        Ok(())
    }

    async fn eject_if_adf(&mut self) {
        if self.options.source == ScanSource::Adf {
            if let Err(e) = self.device.eject().await {
                warn!("Eject after cancel failed: {e}");
            }
        }
    }
}

/// Transfer geometry in pixels at the effective resolution
struct Geometry {
    left: u16,
    top: u16,
    width: u16,
    /// Lines delivered to the caller
    height: u16,
    /// Lines requested from the device, includes shuffle slack
    raw_height: u16,
    line_distance: usize,
}
