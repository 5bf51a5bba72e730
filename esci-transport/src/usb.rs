//! USB bulk channel
//!
//! Scanners expose one vendor-class interface with a bulk-in and a
//! bulk-out endpoint. The channel opens by `bus:addr` path when the
//! device name carried one, otherwise by the first device matching the
//! Epson vendor id, and reads back the product id as its correlation
//! id.

use std::time::Duration;

use async_trait::async_trait;
use rusb::{Context, DeviceHandle, Direction, TransferType, UsbContext};
use tracing::{debug, trace, warn};

use crate::{error::*, Channel, TransportKind, DEFAULT_MAX_REQUEST};

/// Epson vendor id
pub const VENDOR_ID: u16 = 0x04B8;

const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30);

struct Endpoints {
    iface: u8,
    bulk_in: u8,
    bulk_out: u8,
}

/// USB-bulk transport
pub struct UsbChannel {
    path: Option<String>,
    handle: Option<DeviceHandle<Context>>,
    endpoints: Option<Endpoints>,
    product_id: u16,
    max_request: usize,
}

impl UsbChannel {
    /// Create a channel for `bus:addr`, or for the first Epson device
    /// when `path` is `None`. No hardware is touched until `open`.
    pub fn new(path: Option<String>) -> Self {
        Self {
            path,
            handle: None,
            endpoints: None,
            product_id: 0,
            max_request: DEFAULT_MAX_REQUEST,
        }
    }

    fn matches_path(&self, device: &rusb::Device<Context>) -> bool {
        match &self.path {
            Some(path) => {
                let formatted = format!("{:03}:{:03}", device.bus_number(), device.address());
                *path == formatted
            }
            None => false,
        }
    }

    fn locate(&self, ctx: &Context) -> Result<rusb::Device<Context>> {
        let wanted = self.path.clone().unwrap_or_else(|| "any".to_string());

        for device in ctx.devices()?.iter() {
            if self.path.is_some() {
                if self.matches_path(&device) {
                    return Ok(device);
                }
                continue;
            }
            if let Ok(desc) = device.device_descriptor() {
                if desc.vendor_id() == VENDOR_ID {
                    return Ok(device);
                }
            }
        }

        Err(Error::NoDevice(format!("usb:{wanted}")))
    }

    fn find_endpoints(device: &rusb::Device<Context>) -> Result<Endpoints> {
        let config = device.active_config_descriptor()?;

        for iface in config.interfaces() {
            for desc in iface.descriptors() {
                let mut bulk_in = None;
                let mut bulk_out = None;
                for ep in desc.endpoint_descriptors() {
                    if ep.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match ep.direction() {
                        Direction::In => bulk_in = Some(ep.address()),
                        Direction::Out => bulk_out = Some(ep.address()),
                    }
                }
                if let (Some(bulk_in), Some(bulk_out)) = (bulk_in, bulk_out) {
                    return Ok(Endpoints {
                        iface: desc.interface_number(),
                        bulk_in,
                        bulk_out,
                    });
                }
            }
        }

        Err(Error::NoDevice("no bulk endpoint pair".to_string()))
    }
}

#[async_trait]
impl Channel for UsbChannel {
    async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let ctx = Context::new()?;
        let device = self.locate(&ctx)?;
        let desc = device.device_descriptor()?;
        let endpoints = Self::find_endpoints(&device)?;

        let handle = device.open()?;
        if handle.kernel_driver_active(endpoints.iface).unwrap_or(false) {
            handle.detach_kernel_driver(endpoints.iface)?;
        }
        handle.claim_interface(endpoints.iface)?;

        self.product_id = desc.product_id();

        debug!(
            bus = device.bus_number(),
            addr = device.address(),
            product = format_args!("0x{:04X}", self.product_id),
            "USB channel open"
        );

        self.handle = Some(handle);
        self.endpoints = Some(endpoints);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let (Some(handle), Some(endpoints)) = (self.handle.take(), self.endpoints.take()) {
            debug!("USB channel close");
            if let Err(e) = handle.release_interface(endpoints.iface) {
                warn!(error = %e, "Failed to release USB interface");
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(Error::NotOpen)?;
        let endpoints = self.endpoints.as_ref().ok_or(Error::NotOpen)?;

        trace!(
            len = data.len(),
            head = ?&data[..data.len().min(16)],
            "USB bulk out"
        );

        let n = handle.write_bulk(endpoints.bulk_out, data, TRANSFER_TIMEOUT)?;
        Ok(n)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle.as_ref().ok_or(Error::NotOpen)?;
        let endpoints = self.endpoints.as_ref().ok_or(Error::NotOpen)?;

        let limit = buf.len().min(self.max_request);
        let n = handle.read_bulk(endpoints.bulk_in, &mut buf[..limit], TRANSFER_TIMEOUT)?;

        trace!(len = n, head = ?&buf[..n.min(16)], "USB bulk in");
        Ok(n)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn correlation_id(&self) -> u16 {
        self.product_id
    }

    fn max_request_size(&self) -> usize {
        self.max_request
    }

    fn set_max_request_size(&mut self, size: usize) {
        self.max_request = self.max_request.min(size);
    }
}

impl Drop for UsbChannel {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("USB channel dropped while still open");
        }
    }
}
