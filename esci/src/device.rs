//! High-level device interface
//!
//! A [`Device`] owns one transport channel and is mutated exclusively
//! by the command layer here: every operation is send-then-receive, a
//! 1-2 byte opcode answered by a single acknowledgement byte or an
//! info block plus payload.

use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, info, trace, warn};

use esci_core::command::ReplyShape;
use esci_core::extended::{DeviceStatus, ExtStatus, ExtensionKind, StatusReport};
use esci_core::reply::{Ack, InfoBlock, StatusBits, TrailerBits, ACK};
use esci_core::{Command, Identity, ParameterBlock};
use esci_transport::Channel;
use esci_types::{DriverStatus, ResolutionTable, ScanArea};

use crate::error::{Error, Result};

/// Ceiling on block-read retries
pub const BLOCK_RETRY_LIMIT: usize = 3;

/// Mark byte used when it is unknown whether rows are offset
const FOCUS_DEFAULT: u8 = 0x40;

/// One optional scan source with its observed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub kind: ExtensionKind,
    pub status: ExtStatus,

    /// Maximum extent in pixels at the device base resolution
    pub max_pixels: (u16, u16),

    /// Usable scan window recomputed from the pixel maxima
    pub area: ScanArea,
}

impl Extension {
    fn from_report(report: &esci_core::ExtensionReport, base_resolution: u16) -> Self {
        Self {
            kind: report.kind,
            status: report.status,
            max_pixels: report.max_pixels,
            area: usable_area(report.max_pixels, base_resolution),
        }
    }

    fn update(&mut self, report: &esci_core::ExtensionReport, base_resolution: u16) {
        self.status = report.status;
        self.max_pixels = report.max_pixels;
        self.area = usable_area(report.max_pixels, base_resolution);
    }
}

/// Pixel maxima to a window in 1/100 mm at the base resolution
fn usable_area(max_pixels: (u16, u16), base_resolution: u16) -> ScanArea {
    if base_resolution == 0 {
        return ScanArea::default();
    }
    let to_hmm = |px: u16| (px as u64 * 2540 / base_resolution as u64) as u32;
    ScanArea {
        left: 0,
        top: 0,
        width: to_hmm(max_pixels.0),
        height: to_hmm(max_pixels.1),
    }
}

/// One image-data block received while transferring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlock {
    pub data: Vec<u8>,

    /// Device reported the end of the current page
    pub end_of_page: bool,

    /// Device acknowledged a pending cancel
    pub cancel_ack: bool,
}

/// The stateful representation of one physical scanner
pub struct Device {
    channel: Box<dyn Channel>,

    /// Two-character command level from identity
    pub command_level: [u8; 2],

    /// Firmware name from extended status
    pub firmware: String,

    /// Raw status byte of the last info block
    pub last_status: u8,

    pub flatbed: Option<Extension>,
    pub adf: Option<Extension>,
    pub tpu: Option<Extension>,

    pub resolutions: ResolutionTable,
    pub base_resolution: u16,
    pub max_pixels: (u16, u16),

    /// Color-row offset in lines at base resolution
    pub optical_offset: u16,

    /// Extended (FS) command set; decided once at inquiry
    using_fs: bool,
    inquired: bool,

    lock_supported: bool,
    locked: bool,

    /// Scratch region for the extended-parameter block
    pub params: ParameterBlock,
}

impl Device {
    /// Wrap an opened channel. Capability state stays empty until
    /// [`Device::inquire`] runs.
    pub fn new(channel: Box<dyn Channel>) -> Self {
        Self {
            channel,
            command_level: [0; 2],
            firmware: String::new(),
            last_status: 0,
            flatbed: None,
            adf: None,
            tpu: None,
            resolutions: ResolutionTable::default(),
            base_resolution: 0,
            max_pixels: (0, 0),
            optical_offset: 0,
            using_fs: false,
            inquired: false,
            lock_supported: true,
            locked: false,
            params: ParameterBlock::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    pub fn uses_extended_commands(&self) -> bool {
        self.using_fs
    }

    pub fn is_inquired(&self) -> bool {
        self.inquired
    }

    pub fn correlation_id(&self) -> u16 {
        self.channel.correlation_id()
    }

    /// Release the channel; the device is unusable afterwards
    pub async fn close(&mut self) -> Result<()> {
        if self.channel.is_open() {
            info!("Closing device");
            self.channel.close().await?;
        }
        Ok(())
    }

    /// Learn capabilities: extended status first (for the firmware
    /// name), then identity with quirk patching. `using_fs` is decided
    /// here, once, for the life of the device.
    pub async fn inquire(&mut self) -> Result<()> {
        self.request_extended_status().await?;

        let payload = self.command_info(Command::RequestIdentity).await?;
        let identity = Identity::decode(&payload, &self.firmware)?;

        self.command_level = identity.command_level;
        self.base_resolution = identity.base_resolution;
        self.max_pixels = identity.max_pixels;
        self.optical_offset = identity.optical_offset;
        self.using_fs = identity.uses_extended_commands();
        self.resolutions = identity.resolutions;
        self.inquired = true;

        info!(
            level = %String::from_utf8_lossy(&self.command_level),
            firmware = %self.firmware,
            fs = self.using_fs,
            "Device inquired"
        );
        Ok(())
    }

    /// Request extended status and fold it into the device.
    ///
    /// An extension is allocated the first time its presence bit is
    /// observed and never removed afterwards.
    pub async fn request_extended_status(&mut self) -> Result<StatusReport> {
        let payload = self.command_info(Command::RequestExtendedStatus).await?;
        let report = StatusReport::decode(&payload)?;

        self.firmware = report.firmware.clone();
        let base = self.base_resolution;

        for (slot, rep) in [
            (&mut self.flatbed, &report.flatbed),
            (&mut self.adf, &report.adf),
            (&mut self.tpu, &report.tpu),
        ] {
            match slot {
                Some(ext) => ext.update(rep, base),
                None if rep.is_installed() => {
                    debug!(kind = ?rep.kind, "Extension observed");
                    *slot = Some(Extension::from_report(rep, base));
                }
                None => {}
            }
        }

        if report.device.contains(DeviceStatus::FATAL) {
            return Err(Error::Condition(self.fatal_condition()));
        }
        Ok(report)
    }

    /// Map per-extension error bits to the specific domain condition
    fn fatal_condition(&self) -> DriverStatus {
        for ext in [&self.adf, &self.tpu, &self.flatbed].into_iter().flatten() {
            if ext.status.contains(ExtStatus::PAPER_JAM) {
                return DriverStatus::Jammed;
            }
            if ext.status.contains(ExtStatus::COVER_OPEN) {
                return DriverStatus::CoverOpen;
            }
            if ext.status.contains(ExtStatus::PAPER_EMPTY) {
                return DriverStatus::NoDocs;
            }
        }
        DriverStatus::IoError
    }

    /// Poll extended status until the lamp is warm, bounded by
    /// `timeout`. Fails as busy when the bound is hit.
    pub async fn wait_until_ready(&mut self, timeout: Duration, poll: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let report = self.request_extended_status().await?;
            if !report.is_warming_up() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Device still warming up after {:?}", timeout);
                return Err(Error::Busy);
            }
            debug!("Device warming up, polling again");
            tokio::time::sleep(poll).await;
        }
    }

    /// Acquire the carriage lock. A NAK permanently disables lock use
    /// for this device; BUSY surfaces as a busy condition.
    pub async fn lock(&mut self) -> Result<()> {
        if !self.lock_supported || self.locked {
            return Ok(());
        }
        match self.command_ack(Command::LockScanner, &[]).await? {
            Ack::Ok => {
                self.locked = true;
                Ok(())
            }
            Ack::Busy => Err(Error::Busy),
            Ack::Rejected => {
                debug!("Lock unsupported; disabling for this device");
                self.lock_supported = false;
                Ok(())
            }
        }
    }

    pub async fn unlock(&mut self) -> Result<()> {
        if !self.lock_supported || !self.locked {
            return Ok(());
        }
        match self.command_ack(Command::UnlockScanner, &[]).await? {
            Ack::Ok => {
                self.locked = false;
                Ok(())
            }
            Ack::Busy => Err(Error::Busy),
            Ack::Rejected => {
                self.lock_supported = false;
                self.locked = false;
                Ok(())
            }
        }
    }

    /// Reset the device to power-on defaults
    pub async fn initialize(&mut self) -> Result<()> {
        self.expect_ok(Command::Initialize, &[]).await
    }

    pub async fn set_resolution(&mut self, x_dpi: u16, y_dpi: u16) -> Result<()> {
        let mut args = [0u8; 4];
        args[..2].copy_from_slice(&x_dpi.to_le_bytes());
        args[2..].copy_from_slice(&y_dpi.to_le_bytes());
        self.expect_ok(Command::SetResolution, &args).await
    }

    /// Scan window in pixels at the selected resolution
    pub async fn set_scan_area(
        &mut self,
        left: u16,
        top: u16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        let mut args = [0u8; 8];
        args[0..2].copy_from_slice(&left.to_le_bytes());
        args[2..4].copy_from_slice(&top.to_le_bytes());
        args[4..6].copy_from_slice(&width.to_le_bytes());
        args[6..8].copy_from_slice(&height.to_le_bytes());
        self.expect_ok(Command::SetScanArea, &args).await
    }

    pub async fn set_color_mode(&mut self, code: u8) -> Result<()> {
        self.expect_ok(Command::SetColorMode, &[code]).await
    }

    pub async fn set_data_format(&mut self, depth: u8) -> Result<()> {
        self.expect_ok(Command::SetDataFormat, &[depth]).await
    }

    pub async fn set_line_count(&mut self, lines: u8) -> Result<()> {
        self.expect_ok(Command::SetLineCount, &[lines]).await
    }

    pub async fn set_brightness(&mut self, brightness: i8) -> Result<()> {
        self.expect_ok(Command::SetBrightness, &[brightness as u8])
            .await
    }

    pub async fn set_gamma(&mut self, selector: u8) -> Result<()> {
        self.expect_ok(Command::SetGamma, &[selector]).await
    }

    pub async fn set_halftone(&mut self, mode: u8) -> Result<()> {
        self.expect_ok(Command::SetHalftone, &[mode]).await
    }

    pub async fn set_speed(&mut self, speed: u8) -> Result<()> {
        self.expect_ok(Command::SetSpeed, &[speed]).await
    }

    pub async fn set_focus(&mut self) -> Result<()> {
        self.expect_ok(Command::SetFocus, &[FOCUS_DEFAULT]).await
    }

    /// Select the active scan source (0 = flatbed, 1 = ADF, 2 = TPU)
    pub async fn control_extension(&mut self, selector: u8) -> Result<()> {
        self.expect_ok(Command::ControlExtension, &[selector]).await
    }

    /// Upload the whole 64-byte parameter block in one round-trip
    pub async fn upload_parameters(&mut self) -> Result<()> {
        if !self.using_fs {
            return Err(Error::NotSupported(
                "extended parameter block needs the FS command set".into(),
            ));
        }
        let block = *self.params.as_bytes();
        self.expect_ok(Command::ExtSetParameters, &block).await
    }

    /// Quick status probe; cheaper than the full extended status
    pub async fn request_status(&mut self) -> Result<StatusBits> {
        self.command_info(Command::RequestStatus).await?;
        Ok(StatusBits::from_bits_retain(self.last_status))
    }

    /// Raw condition snapshot as the device reports it
    pub async fn request_condition(&mut self) -> Result<Vec<u8>> {
        self.command_info(Command::RequestCondition).await
    }

    /// Read the active parameter block back into the scratch region
    pub async fn download_parameters(&mut self) -> Result<()> {
        if !self.using_fs {
            return Err(Error::NotSupported(
                "extended parameter block needs the FS command set".into(),
            ));
        }
        let payload = self.command_info(Command::ExtRequestParameters).await?;
        let raw: [u8; esci_core::PARAMETER_BLOCK_SIZE] =
            payload
                .as_slice()
                .try_into()
                .map_err(|_| Error::Core(esci_core::Error::ReplyTooShort {
                    expected: esci_core::PARAMETER_BLOCK_SIZE,
                    actual: payload.len(),
                }))?;
        self.params = ParameterBlock::from_bytes(raw);
        Ok(())
    }

    /// Begin streaming; the first image block follows immediately
    pub async fn start_scan(&mut self) -> Result<()> {
        let cmd = if self.using_fs {
            Command::ExtStartScan
        } else {
            Command::StartScan
        };
        debug!(%cmd, "Start scan");
        self.send_all(&cmd.encode()).await
    }

    /// Request the next block after a non-final one was consumed
    pub async fn request_next_block(&mut self) -> Result<()> {
        self.send_all(&[ACK]).await
    }

    /// Read one image-data block: info header, payload, and on the
    /// extended protocol a trailing error byte. Fatal flags fail the
    /// read; page-end and cancel-acknowledge are reported to the
    /// caller.
    pub async fn read_image_block(&mut self) -> Result<ImageBlock> {
        let mut header = BytesMut::zeroed(InfoBlock::SIZE);
        self.recv_exact(&mut header).await?;
        let info = InfoBlock::decode(&mut header)?;
        self.last_status = info.status.bits();

        let mut data = vec![0u8; info.payload_len as usize];
        self.recv_exact(&mut data).await?;

        let (fatal, end_of_page, cancel_ack) = if self.using_fs {
            let mut trailer = [0u8; 1];
            self.recv_exact(&mut trailer).await?;
            let bits = TrailerBits::from_bits_retain(trailer[0]);
            (
                bits.contains(TrailerBits::FATAL),
                bits.contains(TrailerBits::PAGE_END),
                bits.contains(TrailerBits::CANCEL_ACK),
            )
        } else {
            (info.is_fatal(), info.is_area_end(), false)
        };

        if fatal {
            warn!(status = self.last_status, "Fatal flag in image block");
            // The extended status tells which condition tripped
            let report = self.request_extended_status().await;
            return Err(match report {
                Err(e) => e,
                Ok(_) => Error::Condition(self.fatal_condition()),
            });
        }

        trace!(
            len = data.len(),
            end_of_page,
            cancel_ack,
            "Image block received"
        );
        Ok(ImageBlock {
            data,
            end_of_page,
            cancel_ack,
        })
    }

    /// Abort the scan: send CAN and await the acknowledgement
    pub async fn cancel_scan(&mut self) -> Result<()> {
        debug!("Cancelling scan");
        self.send_all(&Command::CancelScan.encode()).await?;
        let mut reply = [0u8; 1];
        self.recv_exact(&mut reply).await?;
        match Ack::decode(reply[0])? {
            Ack::Ok => Ok(()),
            _ => Err(Error::InvalidResponse("cancel not acknowledged".into())),
        }
    }

    /// Eject the sheet sitting in the document feeder
    pub async fn eject(&mut self) -> Result<()> {
        self.expect_ok(Command::EjectPaper, &[]).await
    }

    /// Feed the next sheet from the document feeder
    pub async fn load_paper(&mut self) -> Result<()> {
        self.expect_ok(Command::LoadPaper, &[]).await
    }

    // Command plumbing

    async fn expect_ok(&mut self, command: Command, args: &[u8]) -> Result<()> {
        match self.command_ack(command, args).await? {
            Ack::Ok => Ok(()),
            Ack::Busy => Err(Error::Busy),
            Ack::Rejected => Err(Error::Core(esci_core::Error::Rejected(command))),
        }
    }

    /// Send an acknowledgement-shaped command and decode its one reply
    /// byte
    async fn command_ack(&mut self, command: Command, args: &[u8]) -> Result<Ack> {
        debug_assert_eq!(command.reply_shape(), ReplyShape::Ack);
        debug_assert_eq!(command.arg_len(), args.len());

        let mut frame = command.encode();
        frame.extend_from_slice(args);
        trace!(%command, frame = %hex::encode(&frame), "Command");
        self.send_all(&frame).await?;

        let mut reply = [0u8; 1];
        self.recv_exact(&mut reply).await?;
        Ok(Ack::decode(reply[0])?)
    }

    /// Send an info-shaped command and read back its payload
    async fn command_info(&mut self, command: Command) -> Result<Vec<u8>> {
        debug_assert_eq!(command.reply_shape(), ReplyShape::InfoBlock);

        trace!(%command, "Command");
        self.send_all(&command.encode()).await?;

        let mut header = BytesMut::zeroed(InfoBlock::SIZE);
        self.recv_exact(&mut header).await?;
        let info = InfoBlock::decode(&mut header)?;
        self.last_status = info.status.bits();

        let mut payload = vec![0u8; info.payload_len as usize];
        self.recv_exact(&mut payload).await?;
        trace!(%command, payload = %hex::encode(&payload), "Reply");
        Ok(payload)
    }

    async fn send_all(&mut self, data: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            let n = self.channel.send(&data[sent..]).await?;
            if n == 0 {
                return Err(Error::Transport(esci_transport::Error::ShortTransfer {
                    moved: sent,
                    requested: data.len(),
                }));
            }
            sent += n;
        }
        Ok(())
    }

    async fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.channel.recv(&mut buf[filled..]).await?;
            if n == 0 {
                return Err(Error::Transport(esci_transport::Error::ShortTransfer {
                    moved: filled,
                    requested: buf.len(),
                }));
            }
            filled += n;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("level", &String::from_utf8_lossy(&self.command_level))
            .field("firmware", &self.firmware)
            .field("base_resolution", &self.base_resolution)
            .field("using_fs", &self.using_fs)
            .finish()
    }
}
