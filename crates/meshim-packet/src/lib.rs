//! Application packets carried inside Binary frames.
//!
//! Two packet families share the wire, told apart by a 4-byte magic:
//! - [`LogicPkt`]: a command-routed message with a JSON header (command,
//!   channel id, status, flag, routing meta) and an opaque body.
//! - [`BasicPkt`]: an application-level heartbeat (ping/pong).
//!
//! The routing meta keys [`META_DEST_SERVER`] and [`META_DEST_CHANNELS`]
//! are how the mesh addresses a gateway and the channels behind it.

pub mod basic;
pub mod body;
pub mod error;
pub mod location;
pub mod logic;
pub mod wire;

pub use basic::{BasicPkt, CODE_PING, CODE_PONG};
pub use body::{
    ErrorResp, InnerHandshakeReq, KickoutNotify, LoginReq, LoginResp, MessagePush, MessageReq,
    MessageResp, Session,
};
pub use error::{PacketError, Result};
pub use location::Location;
pub use logic::{next_sequence, Flag, Header, LogicPkt, Status};
pub use wire::{
    read_packet, Packet, Protocol, COMMAND_CHAT_USER_TALK, COMMAND_LOGIN_SIGN_IN,
    COMMAND_LOGIN_SIGN_OUT, MAGIC_BASIC_PKT, MAGIC_LOGIC_PKT, META_DEST_CHANNELS,
    META_DEST_SERVER, SN_CHAT, SN_LOGIN,
};
