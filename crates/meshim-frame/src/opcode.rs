//! Frame opcodes.
//!
//! The values follow the WebSocket opcode table so that the TCP and
//! WebSocket transports can share one vocabulary.

use crate::error::FrameError;

/// The kind of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Application payload.
    Binary = 0x2,
    /// Orderly close; the payload may carry a human-readable reason.
    Close = 0x8,
    /// Liveness probe, answered with [`OpCode::Pong`].
    Ping = 0x9,
    /// Liveness reply.
    Pong = 0xA,
}

impl OpCode {
    /// Returns a human-readable name for the opcode.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Binary => "BINARY",
            OpCode::Close => "CLOSE",
            OpCode::Ping => "PING",
            OpCode::Pong => "PONG",
        }
    }

    /// Returns true for control opcodes (everything except Binary).
    pub fn is_control(self) -> bool {
        !matches!(self, OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(FrameError::UnknownOpCode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(code: OpCode) -> Self {
        code as u8
    }
}
