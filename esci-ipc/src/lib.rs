//! Inter-process messaging for the esci driver
//!
//! Two out-of-process helpers hang off the driver: a network-relay
//! daemon that proxies channel I/O to scanners on the LAN, and an
//! image-processing daemon. Both speak the same symmetric
//! length-prefixed framing defined in [`message`]; [`process`] manages
//! the subordinate's lifecycle (spawn, port discovery, teardown).

pub mod error;
pub mod image;
pub mod message;
pub mod process;
pub mod relay;

pub use error::{Error, Result};
pub use image::{ImageClient, ImageJob, ImageParameters};
pub use message::Message;
pub use process::{Exchanger, HelperProcess, StreamExchanger};
pub use relay::RelayClient;

/// Send/receive timeout applied to every helper socket at connect time
pub const EXCHANGE_TIMEOUT_SECS: u64 = 30;

/// Time allowed for a freshly spawned helper to announce its port
pub const STARTUP_TIMEOUT_SECS: u64 = 10;
