//! Network channel, relayed through the out-of-process daemon
//!
//! The relay daemon owns the actual TCP session with the scanner; this
//! channel frames every `send`/`recv` as one complete IPC exchange. A
//! reply that moves fewer bytes than the transport reported, or none at
//! all, is a protocol violation and fails as an I/O error; there is no
//! partial-exchange recovery.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use esci_ipc::process::StreamExchanger;
use esci_ipc::{HelperProcess, RelayClient};

use crate::{error::*, Channel, TransportKind, DEFAULT_MAX_REQUEST};

/// Executable name of the relay daemon, resolved via `PATH`
pub const RELAY_PROGRAM: &str = "esci-netd";

enum Relay {
    /// Spawn the daemon on open (production path)
    Helper(Box<RelayClient<HelperProcess>>),
    /// Pre-connected stream, used when a relay is already running
    Stream(Box<RelayClient<StreamExchanger<TcpStream>>>),
}

/// TCP-relayed transport
pub struct NetChannel {
    host: String,
    port: Option<u16>,
    relay: Option<Relay>,
    target_id: u16,
    max_request: usize,
}

impl NetChannel {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
            relay: None,
            target_id: 0,
            max_request: DEFAULT_MAX_REQUEST,
        }
    }

    /// Use an already-connected relay socket instead of spawning a
    /// fresh daemon; later opens reuse the shared process-local
    /// connection.
    pub async fn open_with_stream(&mut self, stream: TcpStream) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }
        let relay = Relay::Stream(Box::new(RelayClient::new(StreamExchanger::new(stream))));
        self.relay_open(relay).await
    }

    async fn relay_open(&mut self, mut relay: Relay) -> Result<()> {
        let id = match &mut relay {
            Relay::Helper(client) => client.open(&self.host, self.port).await?,
            Relay::Stream(client) => client.open(&self.host, self.port).await?,
        };
        self.target_id = id;
        self.relay = Some(relay);
        debug!(host = %self.host, target = id, "Network channel open");
        Ok(())
    }
}

#[async_trait]
impl Channel for NetChannel {
    async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let helper = HelperProcess::spawn(RELAY_PROGRAM, &[]).await?;
        let relay = Relay::Helper(Box::new(RelayClient::new(helper)));
        self.relay_open(relay).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut relay) = self.relay.take() {
            debug!(target = self.target_id, "Network channel close");
            let target = self.target_id;
            match &mut relay {
                Relay::Helper(client) => client.close(target).await?,
                Relay::Stream(client) => client.close(target).await?,
            }
            // A spawned daemon gets terminated and reaped; a borrowed
            // stream stays with its owner.
            if let Relay::Helper(client) = relay {
                client.into_inner().shutdown().await?;
            }
        }
        self.target_id = 0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.relay.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        let target = self.target_id;
        let relay = self.relay.as_mut().ok_or(Error::NotOpen)?;

        let moved = match relay {
            Relay::Helper(client) => client.send_data(target, data).await?,
            Relay::Stream(client) => client.send_data(target, data).await?,
        };

        // One handshake step moves the whole request or fails
        if moved != data.len() {
            return Err(Error::ShortTransfer {
                moved,
                requested: data.len(),
            });
        }

        trace!(target, len = moved, "Relayed send");
        Ok(moved)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let target = self.target_id;
        let limit = buf.len().min(self.max_request);
        let relay = self.relay.as_mut().ok_or(Error::NotOpen)?;

        let data = match relay {
            Relay::Helper(client) => client.recv_data(target, limit).await?,
            Relay::Stream(client) => client.recv_data(target, limit).await?,
        };

        if data.len() > limit {
            return Err(Error::ShortTransfer {
                moved: data.len(),
                requested: limit,
            });
        }

        buf[..data.len()].copy_from_slice(&data);
        trace!(target, len = data.len(), "Relayed recv");
        Ok(data.len())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    fn correlation_id(&self) -> u16 {
        self.target_id
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
    async fn test_net_channel_create() {
        let channel = NetChannel::new("10.0.0.5", Some(1865));
        assert!(!channel.is_open());
        assert_eq!(channel.kind(), TransportKind::Network);
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let mut channel = NetChannel::new("10.0.0.5", None);
        assert!(matches!(
            channel.send(&[0x1B]).await,
            Err(Error::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut channel = NetChannel::new("10.0.0.5", None);
        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_close_runs_relay_close_exchange() {
        use esci_ipc::relay::kind;
        use esci_ipc::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();

            let open = Message::read_from(&mut peer).await.unwrap();
            assert_eq!(open.kind, kind::OPEN);
            Message::new(0, kind::OK, 5u16.to_le_bytes().to_vec())
                .write_to(&mut peer)
                .await
                .unwrap();

            let close = Message::read_from(&mut peer).await.unwrap();
            assert_eq!(close.kind, kind::CLOSE);
            assert_eq!(close.id, 5);
            Message::new(5, kind::OK, bytes::Bytes::new())
                .write_to(&mut peer)
                .await
                .unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut channel = NetChannel::new("10.0.0.5", None);
        channel.open_with_stream(stream).await.unwrap();
        assert_eq!(channel.correlation_id(), 5);

        channel.close().await.unwrap();
        assert!(!channel.is_open());
        relay.await.unwrap();
    }
}
