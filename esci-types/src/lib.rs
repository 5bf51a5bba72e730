//! Shared type definitions for the esci driver

pub mod error;
pub mod parameters;
pub mod status;

pub use error::{Error, Result};
pub use parameters::{ColorMode, ResolutionTable, ScanArea, ScanParameters};
pub use status::DriverStatus;
