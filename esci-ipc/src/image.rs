//! Client side of the image-processing daemon
//!
//! The daemon applies model-specific post-processing (deskew, crop)
//! that the driver cannot do in-process. One job is a four-phase call
//! sequence: construct with a model name, set parameters, stream the
//! raw image in, read parameters and image back, destruct. A failure
//! in any phase aborts the remaining phases; the caller's buffer is
//! only replaced after the whole sequence succeeded.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::process::Exchanger;
use crate::relay::kind::{FAIL, OK};

/// Operation codes, OR-ed with the capability flags below
pub mod op {
    pub const CONSTRUCT: u8 = 0x01;
    pub const DESTRUCT: u8 = 0x02;
    pub const SET_PARMS: u8 = 0x03;
    pub const GET_PARMS: u8 = 0x04;
    pub const DATA: u8 = 0x05;

    /// High-nibble capability flags
    pub const CROP: u8 = 0x10;
    pub const SKEW: u8 = 0x20;
}

/// Geometry the daemon needs to interpret the raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageParameters {
    pub pixels_per_line: u32,
    pub lines: u32,
    pub depth: u8,
    pub channels: u8,
}

impl ImageParameters {
    const WIRE_SIZE: usize = 10;

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_SIZE);
        buf.put_u32_le(self.pixels_per_line);
        buf.put_u32_le(self.lines);
        buf.put_u8(self.depth);
        buf.put_u8(self.channels);
        buf.freeze()
    }

    fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.len() < Self::WIRE_SIZE {
            return Err(Error::TruncatedFrame {
                expected: Self::WIRE_SIZE,
                actual: payload.len(),
            });
        }
        Ok(Self {
            pixels_per_line: payload.get_u32_le(),
            lines: payload.get_u32_le(),
            depth: payload.get_u8(),
            channels: payload.get_u8(),
        })
    }
}

/// One in-flight job on the daemon
pub struct ImageJob {
    id: u16,
    flags: u8,
}

/// Client over one image-daemon connection
pub struct ImageClient<E> {
    peer: E,
    next_id: u16,
}

impl<E: Exchanger> ImageClient<E> {
    pub fn new(peer: E) -> Self {
        Self { peer, next_id: 1 }
    }

    /// Run the whole four-phase sequence.
    ///
    /// On success `image` holds the processed bytes and the returned
    /// parameters describe them. On any failure `image` is untouched.
    pub async fn process(
        &mut self,
        model: &str,
        flags: u8,
        params: ImageParameters,
        image: &mut Vec<u8>,
    ) -> Result<ImageParameters> {
        let job = self.construct(model, flags).await?;

        let outcome: Result<(ImageParameters, Bytes)> = async {
            self.set_parameters(&job, params).await?;
            self.send_data(&job, image).await?;
            let out_params = self.get_parameters(&job).await?;
            let out_image = self.read_back(&job).await?;
            Ok((out_params, out_image))
        }
        .await;

        // Destruct regardless; a dead job on the daemon is a leak
        if let Err(e) = self.destruct(job).await {
            warn!(error = %e, "Image job destruct failed");
        }

        let (out_params, out_image) = outcome?;

        // Copy-on-success
        image.clear();
        image.extend_from_slice(&out_image);
        Ok(out_params)
    }

    /// Phase 1: create a job for `model`
    pub async fn construct(&mut self, model: &str, flags: u8) -> Result<ImageJob> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        debug!(model, flags = format_args!("0x{:02X}", flags), "Image job construct");

        self.round(Message::new(
            id,
            op::CONSTRUCT | flags,
            model.as_bytes().to_vec(),
        ))
        .await?;

        Ok(ImageJob { id, flags })
    }

    /// Phase 2: describe the raw bytes about to be streamed
    pub async fn set_parameters(&mut self, job: &ImageJob, params: ImageParameters) -> Result<()> {
        self.round(Message::new(job.id, op::SET_PARMS | job.flags, params.encode()))
            .await?;
        Ok(())
    }

    /// Phase 3: stream the raw image payload
    pub async fn send_data(&mut self, job: &ImageJob, data: &[u8]) -> Result<()> {
        self.round(Message::new(job.id, op::DATA | job.flags, data.to_vec()))
            .await?;
        Ok(())
    }

    /// Phase 4a: read back the post-processing geometry
    pub async fn get_parameters(&mut self, job: &ImageJob) -> Result<ImageParameters> {
        let reply = self
            .round(Message::new(job.id, op::GET_PARMS | job.flags, Bytes::new()))
            .await?;
        ImageParameters::decode(reply.payload)
    }

    /// Phase 4b: read back the processed image
    pub async fn read_back(&mut self, job: &ImageJob) -> Result<Bytes> {
        let reply = self
            .round(Message::new(job.id, op::DATA | job.flags, Bytes::new()))
            .await?;
        Ok(reply.payload)
    }

    /// Final phase: release the job on the daemon
    pub async fn destruct(&mut self, job: ImageJob) -> Result<()> {
        self.round(Message::new(job.id, op::DESTRUCT | job.flags, Bytes::new()))
            .await?;
        Ok(())
    }

    async fn round(&mut self, request: Message) -> Result<Message> {
        let reply = self.peer.exchange(&request).await?;
        match reply.kind {
            OK => Ok(reply),
            FAIL => Err(Error::HelperFailure(FAIL)),
            other => Err(Error::HelperFailure(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StreamExchanger;
    use pretty_assertions::assert_eq;

    fn params() -> ImageParameters {
        ImageParameters {
            pixels_per_line: 640,
            lines: 480,
            depth: 8,
            channels: 3,
        }
    }

    /// Scripted daemon: answers each phase in order, optionally failing
    /// at one phase index
    async fn daemon(mut server: tokio::io::DuplexStream, fail_at: Option<usize>) -> Vec<Message> {
        let mut seen = Vec::new();
        let mut phase = 0usize;
        loop {
            let request = match Message::read_from(&mut server).await {
                Ok(m) => m,
                Err(_) => break,
            };
            let failing = fail_at == Some(phase);
            let kind = if failing { FAIL } else { OK };

            let payload: Bytes = match request.kind & 0x0F {
                op::GET_PARMS => params().encode(),
                op::DATA if request.payload.is_empty() => {
                    Bytes::from_static(b"processed-image")
                }
                _ => Bytes::new(),
            };

            let done = request.kind & 0x0F == op::DESTRUCT;
            seen.push(request.clone());
            Message::new(request.id, kind, payload)
                .write_to(&mut server)
                .await
                .unwrap();
            phase += 1;
            if done {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_four_phase_success() {
        let (client_io, server) = tokio::io::duplex(1 << 16);
        let peer = tokio::spawn(daemon(server, None));

        let mut client = ImageClient::new(StreamExchanger::new(client_io));
        let mut image = b"raw-bytes".to_vec();

        let out = client
            .process("GT-7000", op::CROP, params(), &mut image)
            .await
            .unwrap();

        assert_eq!(out, params());
        assert_eq!(image, b"processed-image");

        let seen = peer.await.unwrap();
        let kinds: Vec<u8> = seen.iter().map(|m| m.kind & 0x0F).collect();
        assert_eq!(
            kinds,
            vec![op::CONSTRUCT, op::SET_PARMS, op::DATA, op::GET_PARMS, op::DATA, op::DESTRUCT]
        );
        // Capability flag travels on every phase
        assert!(seen.iter().all(|m| m.kind & op::CROP != 0));
        // One id for the whole job
        assert!(seen.iter().all(|m| m.id == seen[0].id));
    }

    #[tokio::test]
    async fn test_failed_phase_leaves_buffer_untouched() {
        let (client_io, server) = tokio::io::duplex(1 << 16);
        // Fail at SET_PARMS (phase index 1)
        tokio::spawn(daemon(server, Some(1)));

        let mut client = ImageClient::new(StreamExchanger::new(client_io));
        let mut image = b"raw-bytes".to_vec();

        let result = client.process("GT-7000", 0, params(), &mut image).await;

        assert!(matches!(result, Err(Error::HelperFailure(_))));
        assert_eq!(image, b"raw-bytes");
    }

    #[tokio::test]
    async fn test_parameters_roundtrip() {
        let p = params();
        let decoded = ImageParameters::decode(p.encode()).unwrap();
        assert_eq!(decoded, p);
    }
}
