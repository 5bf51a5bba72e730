//! # esci-core
//!
//! Core ESC/I protocol implementation for Epson-class scanners.
//!
//! This crate provides the low-level protocol primitives:
//! - Command opcode definitions and frame encoding
//! - Info-block and acknowledgement reply framing
//! - Identity and extended-status decoding, including the
//!   per-firmware quirk table
//! - The 64-byte extended-parameter block (FS W)

pub mod command;
pub mod error;
pub mod extended;
pub mod identity;
pub mod params;
pub mod reply;

pub use command::Command;
pub use error::{Error, Result};
pub use extended::{ExtStatus, ExtensionKind, ExtensionReport, StatusReport};
pub use identity::Identity;
pub use params::ParameterBlock;
pub use reply::{Ack, InfoBlock, StatusBits, TrailerBits};

/// Escape byte opening a standard command frame
pub const ESC: u8 = 0x1B;

/// File-separator byte opening an extended command frame
pub const FS: u8 = 0x1C;

/// Info-block header size in bytes
pub const INFO_BLOCK_SIZE: usize = 4;

/// Size of the extended-parameter scratch block
pub const PARAMETER_BLOCK_SIZE: usize = 64;

/// Size of the extended-status reply payload
pub const EXT_STATUS_SIZE: usize = 42;
