use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PacketError, Result};
use crate::wire::MAGIC_LOGIC_PKT;

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Next process-wide packet sequence number (wraps, never 0).
pub fn next_sequence() -> u32 {
    loop {
        let next = SEQUENCE.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if next != 0 {
            return next;
        }
    }
}

/// Direction of a logic packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    #[default]
    Request,
    Response,
    Push,
}

/// Outcome carried by responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Success,
    NoDestination,
    InvalidPacketBody,
    InvalidCommand,
    Unauthorized,
    SystemException,
    NotImplemented,
    SessionNotFound,
}

/// Routing header of a [`LogicPkt`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub command: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub sequence: u32,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub flag: Flag,
    /// Business destination (account or group id).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dest: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl Header {
    pub fn add_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.insert(key.into(), value.into());
    }

    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }

    pub fn del_meta(&mut self, key: &str) -> Option<String> {
        self.meta.remove(key)
    }

    /// The service a command belongs to: the prefix before the first `.`.
    pub fn service_name(&self) -> &str {
        self.command
            .split_once('.')
            .map(|(service, _)| service)
            .unwrap_or(&self.command)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command:{} channel:{} seq:{} status:{:?} flag:{:?}",
            self.command, self.channel_id, self.sequence, self.status, self.flag
        )
    }
}

/// A command-routed application packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicPkt {
    pub header: Header,
    pub body: Bytes,
}

impl LogicPkt {
    /// A fresh request for `command` with a new sequence number.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            header: Header {
                command: command.into(),
                sequence: next_sequence(),
                ..Header::default()
            },
            body: Bytes::new(),
        }
    }

    /// A packet that answers or follows up `header`: same command, channel,
    /// sequence and destination, no meta.
    pub fn new_from(header: &Header) -> Self {
        Self {
            header: Header {
                command: header.command.clone(),
                channel_id: header.channel_id.clone(),
                sequence: header.sequence,
                dest: header.dest.clone(),
                ..Header::default()
            },
            body: Bytes::new(),
        }
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.header.channel_id = channel_id.into();
        self
    }

    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.header.dest = dest.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn add_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.header.add_meta(key, value);
    }

    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.header.get_meta(key)
    }

    pub fn del_meta(&mut self, key: &str) -> Option<String> {
        self.header.del_meta(key)
    }

    pub fn service_name(&self) -> &str {
        self.header.service_name()
    }

    /// Serialize `body` as the packet body.
    pub fn write_body<T: Serialize>(&mut self, body: &T) -> Result<()> {
        self.body = Bytes::from(serde_json::to_vec(body)?);
        Ok(())
    }

    /// Deserialize the packet body.
    pub fn read_body<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(PacketError::Empty);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Encode into the Binary frame payload format.
    ///
    /// ```text
    /// ┌──────────────┬────────────────┬──────────────┬──────────┐
    /// │ Magic (4B)   │ Header len     │ Header       │ Body     │
    /// │ c3 11 a3 65  │ (4B BE)        │ (JSON)       │ (rest)   │
    /// └──────────────┴────────────────┴──────────────┴──────────┘
    /// ```
    pub fn marshal(&self) -> Result<Bytes> {
        let header = serde_json::to_vec(&self.header)?;
        if header.len() > u32::MAX as usize {
            return Err(PacketError::FieldTooLong {
                len: header.len(),
                max: u32::MAX as usize,
            });
        }
        let mut buf = BytesMut::with_capacity(8 + header.len() + self.body.len());
        buf.put_slice(&MAGIC_LOGIC_PKT);
        buf.put_u32(header.len() as u32);
        buf.put_slice(&header);
        buf.put_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Decode a payload produced by [`LogicPkt::marshal`].
    pub fn decode(payload: &Bytes) -> Result<Self> {
        if payload.len() < 8 {
            return Err(PacketError::Truncated {
                needed: 8,
                available: payload.len(),
            });
        }
        if payload[..4] != MAGIC_LOGIC_PKT {
            return Err(PacketError::InvalidMagic);
        }
        let header_len =
            u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
        let header_end = 8usize.saturating_add(header_len);
        if payload.len() < header_end {
            return Err(PacketError::Truncated {
                needed: header_end,
                available: payload.len(),
            });
        }
        let header: Header = serde_json::from_slice(&payload[8..header_end])?;
        Ok(Self {
            header,
            body: payload.slice(header_end..),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{META_DEST_CHANNELS, META_DEST_SERVER};

    #[test]
    fn marshal_decode_preserves_header_meta_and_body() {
        let mut packet = LogicPkt::new("chat.user.talk")
            .with_channel("gate1_alice_1")
            .with_dest("bob")
            .with_body("hi bob");
        packet.add_meta(META_DEST_SERVER, "gate1");
        packet.add_meta(META_DEST_CHANNELS, "a,b");

        let decoded = LogicPkt::decode(&packet.marshal().unwrap()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.get_meta(META_DEST_CHANNELS), Some("a,b"));
    }

    #[test]
    fn service_name_is_command_prefix() {
        assert_eq!(LogicPkt::new("chat.user.talk").service_name(), "chat");
        assert_eq!(LogicPkt::new("login.signin").service_name(), "login");
        assert_eq!(LogicPkt::new("bare").service_name(), "bare");
    }

    #[test]
    fn new_from_copies_routing_fields_but_not_meta() {
        let mut request = LogicPkt::new("login.signin").with_channel("c1").with_dest("x");
        request.add_meta(META_DEST_SERVER, "gate1");

        let resp = LogicPkt::new_from(&request.header);
        assert_eq!(resp.header.command, "login.signin");
        assert_eq!(resp.header.channel_id, "c1");
        assert_eq!(resp.header.sequence, request.header.sequence);
        assert_eq!(resp.header.dest, "x");
        assert!(resp.header.meta.is_empty());
    }

    #[test]
    fn del_meta_removes_key() {
        let mut packet = LogicPkt::new("chat.user.talk");
        packet.add_meta(META_DEST_SERVER, "gate1");
        assert_eq!(packet.del_meta(META_DEST_SERVER).as_deref(), Some("gate1"));
        assert!(packet.get_meta(META_DEST_SERVER).is_none());
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let packet = LogicPkt::new("chat.user.talk").marshal().unwrap();
        let truncated = packet.slice(..10);
        assert!(matches!(
            LogicPkt::decode(&truncated),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn read_body_on_empty_body_fails() {
        let packet = LogicPkt::new("chat.user.talk");
        let result: Result<serde_json::Value> = packet.read_body();
        assert!(matches!(result, Err(PacketError::Empty)));
    }

    #[test]
    fn sequences_are_distinct() {
        let a = next_sequence();
        let b = next_sequence();
        assert_ne!(a, b);
        assert_ne!(a, 0);
    }
}
