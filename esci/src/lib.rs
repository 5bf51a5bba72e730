//! # esci
//!
//! Driver engine for ESC/I scanners: the stateful [`Device`] protocol
//! layer and the [`ScanSession`] streaming state machine, on top of the
//! transport channels from `esci-transport`.
//!
//! ## Quick start
//!
//! ```no_run
//! use esci::{Device, ScanOptions, ScanSession};
//! use esci_transport::{channel_for, InterpreterRegistry};
//!
//! #[tokio::main]
//! async fn main() -> esci::Result<()> {
//!     let registry = InterpreterRegistry::new();
//!     let mut channel = channel_for("usb:001:002", &registry)?;
//!     channel.open().await?;
//!
//!     let mut session = ScanSession::new(Device::new(channel), ScanOptions::default())?;
//!     session.start().await?;
//!
//!     let mut buf = vec![0u8; 65536];
//!     loop {
//!         let n = session.read(&mut buf).await?;
//!         if n == 0 {
//!             break;
//!         }
//!         // hand bytes to the consumer
//!     }
//!     session.finish().await?;
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod error;
pub mod session;
pub mod shuffle;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use device::{Device, Extension, ImageBlock};
pub use error::{Error, Result};
pub use session::{ScanOptions, ScanSession, ScanSource, SessionState};
pub use shuffle::ColorShuffler;

// Re-export types
pub use esci_core::{Command, Identity, ParameterBlock};
pub use esci_types::{ColorMode, DriverStatus, ResolutionTable, ScanArea, ScanParameters};
