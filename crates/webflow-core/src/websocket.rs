//! WebSocket upgrade (RFC 6455)
//!
//! The server only performs the handshake. Once `101 Switching Protocols`
//! is out, the socket belongs to a [`WebSocketSink`]; the frame codec here is
//! for sinks that speak the protocol themselves.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};

const MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` for a client key
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(MAGIC.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Takes ownership of an upgraded socket. The server never touches the
/// connection again after `handoff`.
pub trait WebSocketSink<C> {
    fn handoff(&mut self, conn: C);
}

/// Sink for builds without a console: hangs up right away
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseOnHandoff;

impl<C: crate::net::Connection> WebSocketSink<C> for CloseOnHandoff {
    fn handoff(&mut self, mut conn: C) {
        conn.close();
    }
}

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte & 0x0F {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(&self) -> bool {
        (*self as u8) & 0x08 != 0
    }
}

/// WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    fn unmasked(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            mask: None,
            payload,
        }
    }

    pub fn text(data: impl Into<String>) -> Self {
        Self::unmasked(Opcode::Text, data.into().into_bytes())
    }

    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::unmasked(Opcode::Pong, data.into())
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::unmasked(Opcode::Close, payload)
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut buf = Vec::with_capacity(len + 14);

        let fin_bit: u8 = if self.fin { 0x80 } else { 0x00 };
        buf.push(fin_bit | (self.opcode as u8));

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };
        if len < 126 {
            buf.push(mask_bit | (len as u8));
        } else if len < 65536 {
            buf.push(mask_bit | 126);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            buf.push(mask_bit | 127);
            buf.extend_from_slice(&(len as u64).to_be_bytes());
        }

        match self.mask {
            Some(mask) => {
                buf.extend_from_slice(&mask);
                buf.extend(self.payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
            }
            None => buf.extend_from_slice(&self.payload),
        }
        buf
    }

    /// Decode one frame from the front of `data`. Returns the frame and the
    /// bytes it used, or `None` if `data` does not hold a whole frame yet.
    pub fn decode(data: &[u8]) -> Option<(Self, usize)> {
        if data.len() < 2 {
            return None;
        }

        let fin = (data[0] & 0x80) != 0;
        let opcode = Opcode::from_u8(data[0])?;
        let masked = (data[1] & 0x80) != 0;
        let mut payload_len = (data[1] & 0x7F) as u64;
        let mut offset = 2;

        if payload_len == 126 {
            let bytes = data.get(2..4)?;
            payload_len = u64::from(u16::from_be_bytes([bytes[0], bytes[1]]));
            offset = 4;
        } else if payload_len == 127 {
            let bytes: [u8; 8] = data.get(2..10)?.try_into().ok()?;
            payload_len = u64::from_be_bytes(bytes);
            offset = 10;
        }

        let mask = if masked {
            let key: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
            offset += 4;
            Some(key)
        } else {
            None
        };

        let end = offset.checked_add(usize::try_from(payload_len).ok()?)?;
        let mut payload = data.get(offset..end)?.to_vec();
        if let Some(mask) = mask {
            for (i, byte) in payload.iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Some((
            Frame {
                fin,
                opcode,
                mask,
                payload,
            },
            end,
        ))
    }
}
