//! Serial stream framing for the Meshtastic device API.
//!
//! Each protobuf is sent as `0x94 0xC3 <len_hi> <len_lo> <payload>`. The decoder
//! can be fed arbitrary chunks (including boot log text between frames) and
//! yields complete payloads, resynchronising on the next header after garbage.
use bytes::{Buf, BytesMut};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
/// Largest payload the firmware emits or accepts.
pub const MAX_PAYLOAD: usize = 512;

/// Wrap a protobuf payload in a stream frame.
pub fn encode_frame(payload: &[u8]) -> anyhow::Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD {
        return Err(anyhow::anyhow!(
            "payload of {} bytes exceeds frame limit {}",
            payload.len(),
            MAX_PAYLOAD
        ));
    }
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(START1);
    out.push(START2);
    out.push((payload.len() >> 8) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Ok(out)
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    /// Bytes discarded while searching for a header (console text, noise).
    skipped: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            skipped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Next complete payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Align to START1
            match self.buf.iter().position(|&b| b == START1) {
                Some(0) => {}
                Some(pos) => {
                    self.skipped += pos;
                    self.buf.advance(pos);
                }
                None => {
                    self.skipped += self.buf.len();
                    self.buf.clear();
                    return None;
                }
            }
            if self.buf.len() < 4 {
                return None;
            }
            if self.buf[1] != START2 {
                self.skipped += 1;
                self.buf.advance(1);
                continue;
            }
            let len = ((self.buf[2] as usize) << 8) | self.buf[3] as usize;
            if len > MAX_PAYLOAD {
                self.skipped += 1;
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < 4 + len {
                return None;
            }
            self.buf.advance(4);
            return Some(self.buf.split_to(len).to_vec());
        }
    }
}
