//! Wire frames for meshim connections.
//!
//! Every message exchanged between a client and a gateway, or between two
//! mesh processes, is framed with:
//! - A 1-byte opcode (Binary, Close, Ping, Pong)
//! - A 4-byte big-endian payload length
//!
//! [`FrameCodec`] plugs the format into `tokio_util::codec` so that channels
//! and mesh clients only ever see complete frames.

pub mod codec;
pub mod error;
pub mod framed;
pub mod opcode;

pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use framed::FrameCodec;
pub use opcode::OpCode;
