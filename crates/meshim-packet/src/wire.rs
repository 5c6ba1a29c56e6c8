//! Wire-level constants shared by gateways and services.

use bytes::Bytes;

use crate::basic::BasicPkt;
use crate::error::{PacketError, Result};
use crate::logic::LogicPkt;

/// Magic prefix of a [`LogicPkt`].
pub const MAGIC_LOGIC_PKT: [u8; 4] = [0xc3, 0x11, 0xa3, 0x65];
/// Magic prefix of a [`BasicPkt`].
pub const MAGIC_BASIC_PKT: [u8; 4] = [0xc3, 0x15, 0xa7, 0x65];

/// Service id of the gateway the packet must be delivered through.
pub const META_DEST_SERVER: &str = "dest.server";
/// Comma-joined channel ids behind [`META_DEST_SERVER`].
pub const META_DEST_CHANNELS: &str = "dest.channels";

pub const COMMAND_LOGIN_SIGN_IN: &str = "login.signin";
pub const COMMAND_LOGIN_SIGN_OUT: &str = "login.signout";
pub const COMMAND_CHAT_USER_TALK: &str = "chat.user.talk";

/// Service name of the login service.
pub const SN_LOGIN: &str = "login";
/// Service name of the chat service.
pub const SN_CHAT: &str = "chat";

/// Transport protocol advertised by a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Websocket,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Websocket => "websocket",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Either packet family.
#[derive(Debug, Clone)]
pub enum Packet {
    Logic(LogicPkt),
    Basic(BasicPkt),
}

/// Decode a Binary frame payload into whichever packet family it carries.
pub fn read_packet(payload: &Bytes) -> Result<Packet> {
    if payload.len() < 4 {
        return Err(PacketError::Truncated {
            needed: 4,
            available: payload.len(),
        });
    }
    match [payload[0], payload[1], payload[2], payload[3]] {
        MAGIC_LOGIC_PKT => LogicPkt::decode(payload).map(Packet::Logic),
        MAGIC_BASIC_PKT => BasicPkt::decode(payload).map(Packet::Basic),
        _ => Err(PacketError::InvalidMagic),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::CODE_PING;

    #[test]
    fn read_packet_dispatches_on_magic() {
        let logic = LogicPkt::new(COMMAND_CHAT_USER_TALK).with_channel("ch-1");
        let payload = logic.marshal().unwrap();
        assert!(matches!(read_packet(&payload).unwrap(), Packet::Logic(p) if p.header.channel_id == "ch-1"));

        let basic = BasicPkt::ping().marshal();
        assert!(matches!(read_packet(&basic).unwrap(), Packet::Basic(p) if p.code == CODE_PING));
    }

    #[test]
    fn read_packet_rejects_unknown_magic() {
        let payload = Bytes::from_static(b"\x00\x01\x02\x03rest");
        assert!(matches!(read_packet(&payload), Err(PacketError::InvalidMagic)));
    }

    #[test]
    fn read_packet_rejects_short_input() {
        let payload = Bytes::from_static(b"\xc3\x11");
        assert!(matches!(read_packet(&payload), Err(PacketError::Truncated { .. })));
    }
}
