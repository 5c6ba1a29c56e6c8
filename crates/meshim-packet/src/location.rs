use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{PacketError, Result};

/// Where an account's live connection currently is: which gateway, and
/// which channel on that gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub channel_id: String,
    pub gate_id: String,
}

impl Location {
    pub fn new(channel_id: impl Into<String>, gate_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            gate_id: gate_id.into(),
        }
    }

    /// Compact storage form: two `u16`-length-prefixed strings.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(4 + self.channel_id.len() + self.gate_id.len());
        put_short_str(&mut buf, &self.channel_id)?;
        put_short_str(&mut buf, &self.gate_id)?;
        Ok(buf.freeze())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(PacketError::Empty);
        }
        let mut buf = data;
        let channel_id = get_short_str(&mut buf)?;
        let gate_id = get_short_str(&mut buf)?;
        Ok(Self {
            channel_id,
            gate_id,
        })
    }
}

fn put_short_str(buf: &mut BytesMut, value: &str) -> Result<()> {
    if value.len() > u16::MAX as usize {
        return Err(PacketError::FieldTooLong {
            len: value.len(),
            max: u16::MAX as usize,
        });
    }
    buf.put_u16(value.len() as u16);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn get_short_str(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(PacketError::Truncated {
            needed: 2,
            available: buf.remaining(),
        });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(PacketError::Truncated {
            needed: len,
            available: buf.remaining(),
        });
    }
    let value = std::str::from_utf8(&buf[..len]).map_err(|_| PacketError::InvalidUtf8)?;
    let value = value.to_string();
    buf.advance(len);
    Ok(value)
}
