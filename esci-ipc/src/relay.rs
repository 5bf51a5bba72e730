//! Client side of the network-relay daemon
//!
//! The relay proxies raw channel I/O to scanners reachable over the
//! LAN. Each driver-level `send`/`recv` is exactly one framed exchange;
//! the relay answers every request, so a missing or short reply is an
//! I/O failure, never something to ride out.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::process::Exchanger;

/// Request type codes; a reply carries [`kind::OK`] or a failure status
pub mod kind {
    /// Success status in replies
    pub const OK: u8 = 0x00;
    /// Open a connection to a scanner, payload = `host[:port]`
    pub const OPEN: u8 = 0x01;
    /// Close the connection for the id in the header
    pub const CLOSE: u8 = 0x02;
    /// List reachable scanners
    pub const LIST: u8 = 0x03;
    /// Query connection status
    pub const STATUS: u8 = 0x04;
    /// Forward payload bytes to the scanner
    pub const SEND: u8 = 0x05;
    /// Read back up to the requested byte count
    pub const RECV: u8 = 0x06;
    /// Generic failure status in replies
    pub const FAIL: u8 = 0x7F;
}

/// Stateful client over one relay connection
pub struct RelayClient<E> {
    peer: E,
}

impl<E: Exchanger> RelayClient<E> {
    pub fn new(peer: E) -> Self {
        Self { peer }
    }

    /// Give the peer back, e.g. to shut a helper process down after the
    /// last relayed connection is closed
    pub fn into_inner(self) -> E {
        self.peer
    }

    /// Open a relayed connection; returns the target id every later
    /// exchange for this scanner must carry
    pub async fn open(&mut self, host: &str, port: Option<u16>) -> Result<u16> {
        let target = match port {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        };

        debug!(%target, "Relay open");

        let reply = self
            .round(Message::new(0, kind::OPEN, target.into_bytes()))
            .await?;

        if reply.payload.len() < 2 {
            return Err(Error::TruncatedFrame {
                expected: 2,
                actual: reply.payload.len(),
            });
        }
        let id = u16::from_le_bytes([reply.payload[0], reply.payload[1]]);
        debug!(id, "Relay connection established");
        Ok(id)
    }

    /// Close the relayed connection for `target`
    pub async fn close(&mut self, target: u16) -> Result<()> {
        debug!(target, "Relay close");
        self.round(Message::new(target, kind::CLOSE, Bytes::new()))
            .await?;
        Ok(())
    }

    /// Names of scanners the relay can reach, one per line
    pub async fn list(&mut self) -> Result<Vec<String>> {
        let reply = self.round(Message::new(0, kind::LIST, Bytes::new())).await?;
        let text = String::from_utf8_lossy(&reply.payload);
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Relay-side status byte for `target`
    pub async fn status(&mut self, target: u16) -> Result<u8> {
        let reply = self
            .round(Message::new(target, kind::STATUS, Bytes::new()))
            .await?;
        reply.payload.first().copied().ok_or(Error::TruncatedFrame {
            expected: 1,
            actual: 0,
        })
    }

    /// Forward `data` to the scanner behind `target`; returns the byte
    /// count the relay confirmed
    pub async fn send_data(&mut self, target: u16, data: &[u8]) -> Result<usize> {
        trace!(target, len = data.len(), "Relay send");
        let reply = self
            .round(Message::new(target, kind::SEND, data.to_vec()))
            .await?;

        if reply.payload.len() < 4 {
            return Err(Error::TruncatedFrame {
                expected: 4,
                actual: reply.payload.len(),
            });
        }
        let confirmed = u32::from_le_bytes(reply.payload[..4].try_into().unwrap());
        Ok(confirmed as usize)
    }

    /// Read up to `max` bytes from the scanner behind `target`
    pub async fn recv_data(&mut self, target: u16, max: usize) -> Result<Bytes> {
        trace!(target, max, "Relay recv");
        let mut request = BytesMut::with_capacity(4);
        request.put_u32_le(max as u32);

        let reply = self
            .round(Message::new(target, kind::RECV, request.freeze()))
            .await?;
        Ok(reply.payload)
    }

    async fn round(&mut self, request: Message) -> Result<Message> {
        let reply = self.peer.exchange(&request).await?;
        if reply.kind != kind::OK {
            return Err(Error::HelperFailure(reply.kind));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StreamExchanger;
    use pretty_assertions::assert_eq;

    /// Serve one scripted request/reply pair on the peer side
    async fn serve_one(
        server: &mut tokio::io::DuplexStream,
        expect_kind: u8,
        reply: Message,
    ) -> Message {
        let request = Message::read_from(server).await.unwrap();
        assert_eq!(request.kind, expect_kind);
        reply.write_to(server).await.unwrap();
        request
    }

    #[tokio::test]
    async fn test_open_returns_target_id() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let mut client = RelayClient::new(StreamExchanger::new(client_io));

        let peer = tokio::spawn(async move {
            serve_one(
                &mut server,
                kind::OPEN,
                Message::new(0, kind::OK, 0x0203u16.to_le_bytes().to_vec()),
            )
            .await
        });

        let id = client.open("scanner.local", Some(1865)).await.unwrap();
        assert_eq!(id, 0x0203);

        let request = peer.await.unwrap();
        assert_eq!(request.payload.as_ref(), b"scanner.local:1865");
    }

    #[tokio::test]
    async fn test_send_confirms_count() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let mut client = RelayClient::new(StreamExchanger::new(client_io));

        let peer = tokio::spawn(async move {
            serve_one(
                &mut server,
                kind::SEND,
                Message::new(7, kind::OK, 2u32.to_le_bytes().to_vec()),
            )
            .await
        });

        let n = client.send_data(7, &[0x1B, b'I']).await.unwrap();
        assert_eq!(n, 2);

        let request = peer.await.unwrap();
        assert_eq!(request.id, 7);
        assert_eq!(request.payload.as_ref(), &[0x1B, b'I']);
    }

    #[tokio::test]
    async fn test_failure_status_surfaces() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let mut client = RelayClient::new(StreamExchanger::new(client_io));

        tokio::spawn(async move {
            let request = Message::read_from(&mut server).await.unwrap();
            Message::new(request.id, kind::FAIL, Bytes::new())
                .write_to(&mut server)
                .await
                .unwrap();
        });

        let result = client.close(9).await;
        assert!(matches!(result, Err(Error::HelperFailure(0x7F))));
    }

    #[tokio::test]
    async fn test_list_splits_lines() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let mut client = RelayClient::new(StreamExchanger::new(client_io));

        tokio::spawn(async move {
            serve_one(
                &mut server,
                kind::LIST,
                Message::new(0, kind::OK, &b"net:10.0.0.5\nnet:10.0.0.9:1865"[..]),
            )
            .await
        });

        let names = client.list().await.unwrap();
        assert_eq!(names, vec!["net:10.0.0.5", "net:10.0.0.9:1865"]);
    }
}
