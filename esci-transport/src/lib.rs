//! Transport layer for the ESC/I protocol
//!
//! One [`Channel`] owns one transport connection and normalizes
//! USB/SCSI/parallel/network/interpreter I/O into a single
//! send/receive contract. Channels are constructed by a factory keyed
//! on a textual device-name prefix and opened separately, so a bad name
//! never leaks a half-built connection.

pub mod error;
pub mod interpreter;
pub mod net;
pub mod raw;
pub mod usb;

pub use error::{Error, Result};
pub use interpreter::{Interpreter, InterpreterChannel, InterpreterRegistry};
pub use net::NetChannel;
pub use raw::{PioChannel, ScsiChannel};
pub use usb::UsbChannel;

use async_trait::async_trait;

/// Default ceiling on one transport-level request
pub const DEFAULT_MAX_REQUEST: usize = 64 * 1024;

/// Transport variant selected by the device-name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Usb,
    Parallel,
    Scsi,
    Network,
    InterpreterUsb,
}

/// One transport connection
///
/// `send`/`recv` perform exactly one transport-level operation and are
/// only valid while the channel is open; `max_request_size` bounds any
/// single `recv` and may be lowered after construction once the device
/// advertises a smaller limit.
#[async_trait]
pub trait Channel: Send {
    /// Acquire the transport
    async fn open(&mut self) -> Result<()>;

    /// Release the transport; closing twice is a no-op
    async fn close(&mut self) -> Result<()>;

    /// Check if the transport is acquired
    fn is_open(&self) -> bool;

    /// Write `data`, returning the number of bytes moved
    async fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Read into `buf`, returning the number of bytes moved
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Which transport this channel drives
    fn kind(&self) -> TransportKind;

    /// USB product id or network target id
    fn correlation_id(&self) -> u16;

    /// Upper bound on a single request
    fn max_request_size(&self) -> usize;

    /// Lower the request ceiling to a device-specific limit
    fn set_max_request_size(&mut self, size: usize);
}

/// Parsed device name, ready to become a concrete channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSpec {
    /// `usb:<bus>:<addr>` or bare `usb:` for first match
    Usb { path: Option<String> },
    /// `net:<host>[:port]`
    Network { host: String, port: Option<u16> },
    /// `pio:<path>`
    Parallel { path: String },
    /// `scsi:<path>`
    Scsi { path: String },
    /// `interpreter:<usb-path>`
    Interpreter { path: Option<String> },
}

impl ChannelSpec {
    /// Parse a colon-prefixed device name.
    ///
    /// An unrecognized prefix yields `UnsupportedDevice` and constructs
    /// nothing.
    pub fn parse(name: &str) -> Result<Self> {
        let (prefix, rest) = name
            .split_once(':')
            .ok_or_else(|| Error::UnsupportedDevice(name.to_string()))?;

        match prefix {
            "usb" => Ok(Self::Usb {
                path: non_empty(rest),
            }),
            "net" => {
                let (host, port) = match rest.rsplit_once(':') {
                    Some((h, p)) if !h.is_empty() => {
                        let port = p
                            .parse()
                            .map_err(|_| Error::UnsupportedDevice(name.to_string()))?;
                        (h.to_string(), Some(port))
                    }
                    _ => (rest.to_string(), None),
                };
                if host.is_empty() {
                    return Err(Error::UnsupportedDevice(name.to_string()));
                }
                Ok(Self::Network { host, port })
            }
            "pio" => Ok(Self::Parallel {
                path: rest.to_string(),
            }),
            "scsi" => Ok(Self::Scsi {
                path: rest.to_string(),
            }),
            "interpreter" => Ok(Self::Interpreter {
                path: non_empty(rest.strip_prefix("usb:").unwrap_or(rest)),
            }),
            _ => Err(Error::UnsupportedDevice(name.to_string())),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Usb { .. } => TransportKind::Usb,
            Self::Network { .. } => TransportKind::Network,
            Self::Parallel { .. } => TransportKind::Parallel,
            Self::Scsi { .. } => TransportKind::Scsi,
            Self::Interpreter { .. } => TransportKind::InterpreterUsb,
        }
    }

    /// Build the concrete channel for this spec. The channel still has
    /// to be opened; construction itself touches no hardware.
    pub fn into_channel(self, registry: &InterpreterRegistry) -> Result<Box<dyn Channel>> {
        match self {
            Self::Usb { path } => Ok(Box::new(UsbChannel::new(path))),
            Self::Network { host, port } => Ok(Box::new(NetChannel::new(host, port))),
            Self::Parallel { path } => Ok(Box::new(PioChannel::new(path))),
            Self::Scsi { path } => Ok(Box::new(ScsiChannel::new(path))),
            Self::Interpreter { path } => Ok(Box::new(InterpreterChannel::new(
                UsbChannel::new(path),
                registry.clone(),
            ))),
        }
    }
}

/// Parse a device name and construct (but do not open) its channel
pub fn channel_for(name: &str, registry: &InterpreterRegistry) -> Result<Box<dyn Channel>> {
    ChannelSpec::parse(name)?.into_channel(registry)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_usb() {
        assert_eq!(
            ChannelSpec::parse("usb:001:002").unwrap(),
            ChannelSpec::Usb {
                path: Some("001:002".into())
            }
        );
        assert_eq!(
            ChannelSpec::parse("usb:").unwrap(),
            ChannelSpec::Usb { path: None }
        );
    }

    #[test]
    fn test_parse_net() {
        assert_eq!(
            ChannelSpec::parse("net:10.0.0.5:1865").unwrap(),
            ChannelSpec::Network {
                host: "10.0.0.5".into(),
                port: Some(1865)
            }
        );
        assert_eq!(
            ChannelSpec::parse("net:scanner.local").unwrap(),
            ChannelSpec::Network {
                host: "scanner.local".into(),
                port: None
            }
        );
    }

    #[test]
    fn test_parse_pio_scsi_interpreter() {
        assert_eq!(
            ChannelSpec::parse("pio:/dev/parport0").unwrap().kind(),
            TransportKind::Parallel
        );
        assert_eq!(
            ChannelSpec::parse("scsi:/dev/sg1").unwrap().kind(),
            TransportKind::Scsi
        );
        assert_eq!(
            ChannelSpec::parse("interpreter:usb:001:004").unwrap(),
            ChannelSpec::Interpreter {
                path: Some("001:004".into())
            }
        );
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        for name in ["ieee1394:0", "usb", "", "bogus:thing"] {
            let result = ChannelSpec::parse(name);
            assert!(
                matches!(result, Err(Error::UnsupportedDevice(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_each_prefix_selects_one_variant() {
        let registry = InterpreterRegistry::default();
        let cases = [
            ("usb:001:002", TransportKind::Usb),
            ("net:host", TransportKind::Network),
            ("pio:/dev/parport0", TransportKind::Parallel),
            ("scsi:/dev/sg0", TransportKind::Scsi),
            ("interpreter:usb:001:002", TransportKind::InterpreterUsb),
        ];
        for (name, kind) in cases {
            let channel = channel_for(name, &registry).unwrap();
            assert_eq!(channel.kind(), kind, "{name}");
            assert!(!channel.is_open());
        }
    }
}
