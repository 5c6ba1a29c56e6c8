use std::time::Duration;

use meshim_frame::FrameError;

/// Errors that can occur on channels and local servers.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel has fired its close event.
    #[error("channel {0} has closed")]
    Closed(String),

    /// The outbound queue is full; the caller should back off.
    #[error("channel {0} outbound queue is full")]
    QueueFull(String),

    /// The peer sent a Close frame.
    #[error("remote side closed the channel")]
    RemoteClosed,

    /// No frame arrived within the read wait.
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// A write did not complete within the write wait.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The transport reached EOF.
    #[error("connection closed")]
    ConnectionClosed,

    /// No channel is registered under the id.
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    /// The acceptor refused the connection.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// A server was started without a required collaborator.
    #[error("server misconfigured: {0}")]
    Misconfigured(String),

    /// Frame encoding or decoding failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
