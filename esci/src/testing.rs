//! Scripted channel for driving the command and session layers in tests

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use esci_transport::{Channel, Error, Result, TransportKind, DEFAULT_MAX_REQUEST};

#[derive(Default)]
struct Script {
    input: VecDeque<u8>,
    sent: Vec<u8>,

    /// One-shot failures injected at these 1-based receive calls
    fail_recv_at: BTreeSet<usize>,
    recv_calls: usize,
}

/// A channel that replays a prerecorded device-side byte stream and
/// logs everything the host sends. The returned [`ScriptHandle`] keeps
/// feeding and inspecting the script after the channel is boxed away.
pub(crate) struct ScriptedChannel {
    open: bool,
    script: Arc<Mutex<Script>>,
}

#[derive(Clone)]
pub(crate) struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedChannel {
    pub fn new() -> (Self, ScriptHandle) {
        let script = Arc::new(Mutex::new(Script::default()));
        (
            Self {
                open: true,
                script: script.clone(),
            },
            ScriptHandle { script },
        )
    }
}

impl ScriptHandle {
    /// Append bytes the device will hand back on later receives
    pub fn push_reply(&self, bytes: &[u8]) {
        self.script.lock().unwrap().input.extend(bytes.iter().copied());
    }

    /// Everything the host has sent so far
    pub fn sent(&self) -> Vec<u8> {
        self.script.lock().unwrap().sent.clone()
    }

    /// Make the n-th receive call (1-based) fail once; may be called
    /// for several distinct calls
    pub fn fail_recv_at(&self, call: usize) {
        self.script.lock().unwrap().fail_recv_at.insert(call);
    }
}

#[async_trait]
impl Channel for ScriptedChannel {
    async fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn send(&mut self, data: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        self.script.lock().unwrap().sent.extend_from_slice(data);
        Ok(data.len())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        let mut script = self.script.lock().unwrap();
        script.recv_calls += 1;
        let call = script.recv_calls;
        if script.fail_recv_at.remove(&call) {
            return Err(Error::Io(std::io::Error::other("scripted failure")));
        }
        let n = buf.len().min(script.input.len());
        for slot in buf.iter_mut().take(n) {
            *slot = script.input.pop_front().unwrap();
        }
        Ok(n)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn correlation_id(&self) -> u16 {
        0x0815
    }

    fn max_request_size(&self) -> usize {
        DEFAULT_MAX_REQUEST
    }

    fn set_max_request_size(&mut self, _size: usize) {}
}

/// 4-byte info block header
pub(crate) fn info_block(status: u8, payload_len: u16) -> Vec<u8> {
    let mut b = vec![0x02, status];
    b.extend_from_slice(&payload_len.to_le_bytes());
    b
}

/// Extended-status reply with an installed flatbed and the given
/// device-status byte
pub(crate) fn ext_status_reply(device_status: u8, firmware: &str) -> Vec<u8> {
    let mut payload = vec![0u8; esci_core::EXT_STATUS_SIZE];
    payload[0] = device_status;
    payload[11] = 0x80 | 0x40; // flatbed installed and enabled
    payload[12..14].copy_from_slice(&10200u16.to_le_bytes());
    payload[14..16].copy_from_slice(&14040u16.to_le_bytes());
    let name = firmware.as_bytes();
    payload[26..26 + name.len()].copy_from_slice(name);
    for b in &mut payload[26 + name.len()..42] {
        *b = b' ';
    }

    let mut reply = info_block(0, payload.len() as u16);
    reply.extend_from_slice(&payload);
    reply
}

/// Identity reply for a device with one listed resolution
pub(crate) fn identity_reply(level: [u8; 2], base_dpi: u16, optical_offset: u16) -> Vec<u8> {
    let mut payload = vec![level[0], level[1]];
    payload.push(b'R');
    payload.extend_from_slice(&base_dpi.to_le_bytes());
    payload.push(b'A');
    payload.extend_from_slice(&10200u16.to_le_bytes());
    payload.extend_from_slice(&14040u16.to_le_bytes());
    payload.push(b'L');
    payload.extend_from_slice(&optical_offset.to_le_bytes());

    let mut reply = info_block(0, payload.len() as u16);
    reply.extend_from_slice(&payload);
    reply
}
