use std::time::Duration;

use meshim_channel::ChannelError;
use meshim_frame::FrameError;
use meshim_packet::PacketError;

/// Errors that can occur on outbound mesh connections.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the remote address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The connect did not finish in time.
    #[error("dial {addr} timed out after {wait:?}")]
    DialTimeout { addr: String, wait: Duration },

    /// The inner handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("client {0} has connected")]
    AlreadyConnected(String),

    #[error("client {0} is not connected")]
    NotConnected(String),

    #[error("client {0} has closed")]
    Closed(String),

    /// The peer sent a Close frame.
    #[error("remote side closed the connection")]
    RemoteClosed,

    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
