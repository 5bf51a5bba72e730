//! SCSI and parallel-port channels
//!
//! Both drive a character device with plain blocking read/write. The
//! parallel variant is wired up with no-op operations so teardown stays
//! uniform, but its `open` always fails: no currently supported
//! hardware speaks ESC/I over the parallel port.

use async_trait::async_trait;
use std::io::{Read, Write};
use tracing::{debug, trace};

use crate::{error::*, Channel, TransportKind, DEFAULT_MAX_REQUEST};

/// SCSI transport over the generic bus handle (`/dev/sg*`)
pub struct ScsiChannel {
    path: String,
    file: Option<std::fs::File>,
    max_request: usize,
}

impl ScsiChannel {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file: None,
            max_request: DEFAULT_MAX_REQUEST,
        }
    }
}

#[async_trait]
impl Channel for ScsiChannel {
    async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;

        debug!(path = %self.path, "SCSI channel open");
        self.file = Some(file);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            debug!(path = %self.path, "SCSI channel close");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or(Error::NotOpen)?;
        let n = file.write(data)?;
        trace!(len = n, "SCSI write");
        Ok(n)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file.as_mut().ok_or(Error::NotOpen)?;
        let limit = buf.len().min(self.max_request);
        let n = file.read(&mut buf[..limit])?;
        trace!(len = n, "SCSI read");
        Ok(n)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Scsi
    }

    fn correlation_id(&self) -> u16 {
        0
    }

    fn max_request_size(&self) -> usize {
        self.max_request
    }

    fn set_max_request_size(&mut self, size: usize) {
        self.max_request = self.max_request.min(size);
    }
}

/// Parallel-port transport.
///
/// Kept so the factory covers the `pio:` prefix with the uniform
/// open/close lifecycle; `open` reports the device as unsupported.
pub struct PioChannel {
    path: String,
    max_request: usize,
}

impl PioChannel {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            max_request: DEFAULT_MAX_REQUEST,
        }
    }
}

#[async_trait]
impl Channel for PioChannel {
    async fn open(&mut self) -> Result<()> {
        Err(Error::UnsupportedDevice(format!("pio:{}", self.path)))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        false
    }

    async fn send(&mut self, _data: &[u8]) -> Result<usize> {
        Err(Error::NotOpen)
    }

    async fn recv(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::NotOpen)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Parallel
    }

    fn correlation_id(&self) -> u16 {
        0
    }

    fn max_request_size(&self) -> usize {
        self.max_request
    }

    fn set_max_request_size(&mut self, size: usize) {
        self.max_request = self.max_request.min(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pio_open_always_fails() {
        let mut channel = PioChannel::new("/dev/parport0");
        let result = channel.open().await;
        assert!(matches!(result, Err(Error::UnsupportedDevice(_))));
        assert!(!channel.is_open());
        // Teardown still goes through the uniform path
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_scsi_missing_device() {
        let mut channel = ScsiChannel::new("/nonexistent/sg99");
        assert!(channel.open().await.is_err());
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_scsi_send_requires_open() {
        let mut channel = ScsiChannel::new("/dev/sg0");
        assert!(matches!(
            channel.send(&[0x1B, b'F']).await,
            Err(Error::NotOpen)
        ));
    }
}
