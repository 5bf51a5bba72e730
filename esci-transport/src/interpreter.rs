//! Interpreter-wrapped USB channel
//!
//! Some devices do not speak ESC/I natively; a vendor interpreter
//! translates between the command stream and the device's own bulk
//! format. Interpreters are looked up in a registry keyed by USB
//! vendor/product id, so an incomplete or missing translation fails at
//! `open` rather than mid-scan. During teardown the interpreter is
//! released before the inner channel, never after.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::usb::{UsbChannel, VENDOR_ID};
use crate::{error::*, Channel, TransportKind};

/// Vendor byte transforms around the underlying USB transfer
pub trait Interpreter: Send + Sync {
    /// Translate an outgoing command stream into device bytes
    fn encode(&self, data: &[u8]) -> Result<Bytes>;

    /// Translate raw device bytes back into an ESC/I reply stream
    fn decode(&self, data: &[u8]) -> Result<Bytes>;
}

type InterpreterFactory = Arc<dyn Fn() -> Box<dyn Interpreter> + Send + Sync>;

/// Registry mapping (vendor id, product id) to interpreter factories
#[derive(Clone, Default)]
pub struct InterpreterRegistry {
    entries: HashMap<(u16, u16), InterpreterFactory>,
}

impl InterpreterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, vendor: u16, product: u16, factory: F)
    where
        F: Fn() -> Box<dyn Interpreter> + Send + Sync + 'static,
    {
        self.entries.insert((vendor, product), Arc::new(factory));
    }

    pub fn lookup(&self, vendor: u16, product: u16) -> Option<Box<dyn Interpreter>> {
        self.entries.get(&(vendor, product)).map(|f| f())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for InterpreterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterRegistry")
            .field("products", &self.entries.len())
            .finish()
    }
}

/// Decorator around a bulk channel (USB in production) running vendor
/// transforms on every transfer
pub struct InterpreterChannel<C: Channel = UsbChannel> {
    inner: C,
    registry: InterpreterRegistry,
    interpreter: Option<Box<dyn Interpreter>>,
}

impl<C: Channel> InterpreterChannel<C> {
    pub fn new(inner: C, registry: InterpreterRegistry) -> Self {
        Self {
            inner,
            registry,
            interpreter: None,
        }
    }
}

#[async_trait]
impl<C: Channel> Channel for InterpreterChannel<C> {
    async fn open(&mut self) -> Result<()> {
        self.inner.open().await?;

        let product = self.inner.correlation_id();
        match self.registry.lookup(VENDOR_ID, product) {
            Some(interpreter) => {
                debug!(
                    product = format_args!("0x{:04X}", product),
                    "Interpreter attached"
                );
                self.interpreter = Some(interpreter);
                Ok(())
            }
            None => {
                // Fail fast rather than pass untranslated bytes to a
                // device that cannot parse them
                warn!(
                    product = format_args!("0x{:04X}", product),
                    "No interpreter registered for product"
                );
                self.inner.close().await?;
                Err(Error::UnsupportedDevice(format!(
                    "interpreter for product 0x{product:04X}"
                )))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        // Interpreter first, then the channel it translates for
        self.interpreter = None;
        self.inner.close().await
    }

    fn is_open(&self) -> bool {
        self.inner.is_open() && self.interpreter.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let interpreter = self.interpreter.as_ref().ok_or(Error::NotOpen)?;
        let translated = interpreter.encode(data)?;
        let moved = self.inner.send(&translated).await?;
        // A partial write of the translated stream cannot be resumed
        // from the caller's untranslated bytes; surface it here.
        if moved != translated.len() {
            return Err(Error::ShortTransfer {
                moved,
                requested: translated.len(),
            });
        }
        // The caller reasons in command bytes, not translated bytes
        Ok(data.len())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let interpreter = self.interpreter.as_ref().ok_or(Error::NotOpen)?;

        let mut raw = vec![0u8; self.inner.max_request_size()];
        let n = self.inner.recv(&mut raw).await?;
        let decoded = interpreter.decode(&raw[..n])?;

        if decoded.len() > buf.len() {
            return Err(Error::ShortTransfer {
                moved: decoded.len(),
                requested: buf.len(),
            });
        }
        buf[..decoded.len()].copy_from_slice(&decoded);
        Ok(decoded.len())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::InterpreterUsb
    }

    fn correlation_id(&self) -> u16 {
        self.inner.correlation_id()
    }

    fn max_request_size(&self) -> usize {
        self.inner.max_request_size()
    }

    fn set_max_request_size(&mut self, size: usize) {
        self.inner.set_max_request_size(size);
    }
}
