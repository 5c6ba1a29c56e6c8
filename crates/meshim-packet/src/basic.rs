use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{PacketError, Result};
use crate::wire::MAGIC_BASIC_PKT;

/// BasicPkt code: application-level ping.
pub const CODE_PING: u16 = 1;
/// BasicPkt code: application-level pong.
pub const CODE_PONG: u16 = 2;

/// Application-level heartbeat packet.
///
/// Wire form: magic (4) + code (2, BE) + body length (2, BE) + body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicPkt {
    pub code: u16,
    pub body: Bytes,
}

impl BasicPkt {
    pub fn ping() -> Self {
        Self {
            code: CODE_PING,
            body: Bytes::new(),
        }
    }

    pub fn pong() -> Self {
        Self {
            code: CODE_PONG,
            body: Bytes::new(),
        }
    }

    pub fn marshal(&self) -> Bytes {
        // Bodies are tiny heartbeat markers; anything longer is cut at u16::MAX.
        let body_len = self.body.len().min(u16::MAX as usize);
        let mut buf = BytesMut::with_capacity(8 + body_len);
        buf.put_slice(&MAGIC_BASIC_PKT);
        buf.put_u16(self.code);
        buf.put_u16(body_len as u16);
        buf.put_slice(&self.body[..body_len]);
        buf.freeze()
    }

    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() < 8 {
            return Err(PacketError::Truncated {
                needed: 8,
                available: payload.len(),
            });
        }
        if payload[..4] != MAGIC_BASIC_PKT {
            return Err(PacketError::InvalidMagic);
        }
        let code = u16::from_be_bytes([payload[4], payload[5]]);
        let body_len = u16::from_be_bytes([payload[6], payload[7]]) as usize;
        if payload.len() < 8 + body_len {
            return Err(PacketError::Truncated {
                needed: 8 + body_len,
                available: payload.len(),
            });
        }
        Ok(Self {
            code,
            body: payload.slice(8..8 + body_len),
        })
    }
}
