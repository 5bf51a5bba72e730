//! Length-prefixed message framing
//!
//! # Wire format
//!
//! ```text
//! ┌──────────┬──────────┬────────────┬─────────────┐
//! │    Id    │   Kind   │    Size    │   Payload   │
//! │  2 bytes │  1 byte  │  8 bytes   │  Size bytes │
//! │  (LE)    │          │  (LE)      │             │
//! └──────────┴──────────┴────────────┴─────────────┘
//! ```
//!
//! The size travels as a fixed-width field ahead of the payload, so
//! framing never depends on payload content; NUL bytes and zero-length
//! payloads are fine. A read or write that stops short of the declared
//! size is a hard failure.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};

/// Frame header size: id (2) + kind (1) + size (8)
pub const HEADER_SIZE: usize = 11;

/// Ceiling on a single payload; larger frames are refused
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// One framed exchange unit
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    /// Correlation id; request and reply of one exchange share it
    pub id: u16,

    /// Type or status byte, meaning assigned by the helper protocol
    pub kind: u8,

    /// Opaque payload
    pub payload: Bytes,
}

impl Message {
    pub fn new(id: u16, kind: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            kind,
            payload: payload.into(),
        }
    }

    /// Encode to the wire format
    pub fn encode(&self) -> Result<BytesMut> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u16_le(self.id);
        buf.put_u8(self.kind);
        buf.put_u64_le(self.payload.len() as u64);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Write one complete frame; anything short is an error
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = self.encode()?;

        trace!(
            id = self.id,
            kind = format_args!("0x{:02X}", self.kind),
            len = self.payload.len(),
            "IPC send"
        );

        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one complete frame; a stream that ends mid-frame is a hard
    /// framing failure, never a partial message
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_SIZE];
        read_exact_frame(reader, &mut header).await?;

        let id = u16::from_le_bytes([header[0], header[1]]);
        let kind = header[2];
        let size = u64::from_le_bytes(header[3..11].try_into().unwrap()) as usize;

        if size > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut payload = vec![0u8; size];
        read_exact_frame(reader, &mut payload).await?;

        trace!(
            id,
            kind = format_args!("0x{:02X}", kind),
            len = size,
            "IPC recv"
        );

        Ok(Self {
            id,
            kind,
            payload: Bytes::from(payload),
        })
    }
}

async fn read_exact_frame<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::TruncatedFrame {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &format!("0x{:04X}", self.id))
            .field("kind", &format!("0x{:02X}", self.kind))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    async fn roundtrip(msg: &Message) -> Message {
        let (mut client, mut server) = tokio::io::duplex(1024 * 1024);
        msg.write_to(&mut client).await.unwrap();
        Message::read_from(&mut server).await.unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_basic() {
        let msg = Message::new(0x1234, 0x05, &b"image bytes"[..]);
        let back = roundtrip(&msg).await;

        assert_eq!(back.id, 0x1234);
        assert_eq!(back.kind, 0x05);
        assert_eq!(back.payload.as_ref(), b"image bytes");
    }

    #[tokio::test]
    async fn test_roundtrip_empty_payload() {
        let msg = Message::new(7, 0x02, Bytes::new());
        let back = roundtrip(&msg).await;
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn test_roundtrip_nul_bytes() {
        let msg = Message::new(1, 0x01, vec![0, 0, 1, 0, 255, 0]);
        let back = roundtrip(&msg).await;
        assert_eq!(back.payload.as_ref(), &[0, 0, 1, 0, 255, 0]);
    }

    #[tokio::test]
    async fn test_truncated_stream_is_hard_failure() {
        let msg = Message::new(9, 0x05, vec![1u8; 32]);
        let encoded = msg.encode().unwrap();

        // Drop the tail of the frame, then close the stream
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&encoded[..HEADER_SIZE + 10]).await.unwrap();
        drop(client);

        let result = Message::read_from(&mut server).await;
        assert!(matches!(result, Err(Error::TruncatedFrame { .. })));
    }

    #[tokio::test]
    async fn test_oversize_declared_length_refused() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut header = BytesMut::new();
        header.put_u16_le(1);
        header.put_u8(0x05);
        header.put_u64_le(u64::MAX);
        client.write_all(&header).await.unwrap();

        let result = Message::read_from(&mut server).await;
        assert!(matches!(result, Err(Error::PayloadTooLarge { .. })));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_payload(
            id in any::<u16>(),
            kind in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..2048),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            rt.block_on(async {
                let msg = Message::new(id, kind, payload.clone());
                let back = roundtrip(&msg).await;
                prop_assert_eq!(back.id, id);
                prop_assert_eq!(back.kind, kind);
                prop_assert_eq!(back.payload.as_ref(), payload.as_slice());
                Ok(())
            })?;
        }
    }
}
