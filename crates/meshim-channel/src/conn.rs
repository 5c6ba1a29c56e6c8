use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use meshim_frame::{Frame, FrameCodec};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{ChannelError, Result};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Frame stream over the read half of a connection.
pub type FrameReader = FramedRead<BoxedReader, FrameCodec>;
/// Frame sink over the write half of a connection.
pub type FrameWriter = FramedWrite<BoxedWriter, FrameCodec>;

/// A framed connection before it becomes a [`Channel`](crate::Channel).
///
/// Acceptors and dialers use it to run their handshake; the buffered halves
/// are then handed to the channel so no bytes read ahead are lost.
pub struct Conn {
    reader: FrameReader,
    writer: FrameWriter,
    remote_addr: Option<SocketAddr>,
}

impl Conn {
    /// Split a duplex transport into framed halves.
    pub fn new<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::from_parts(reader, writer)
    }

    /// Frame separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: FramedRead::new(Box::new(reader) as BoxedReader, FrameCodec::new()),
            writer: FramedWrite::new(Box::new(writer) as BoxedWriter, FrameCodec::new()),
            remote_addr: None,
        }
    }

    /// Apply a payload limit to both directions.
    pub fn with_max_payload(mut self, max_payload_size: usize) -> Self {
        *self.reader.decoder_mut() = FrameCodec::with_max_payload(max_payload_size);
        *self.writer.encoder_mut() = FrameCodec::with_max_payload(max_payload_size);
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Read the next frame. EOF maps to [`ChannelError::ConnectionClosed`].
    pub async fn read_frame(&mut self) -> Result<Frame> {
        match self.reader.next().await {
            Some(frame) => Ok(frame?),
            None => Err(ChannelError::ConnectionClosed),
        }
    }

    /// Read the next frame, failing with [`ChannelError::ReadTimeout`].
    pub async fn read_frame_timeout(&mut self, wait: Duration) -> Result<Frame> {
        tokio::time::timeout(wait, self.read_frame())
            .await
            .map_err(|_| ChannelError::ReadTimeout(wait))?
    }

    /// Write and flush one frame.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.writer.send(frame).await?;
        Ok(())
    }

    /// Write one frame, failing with [`ChannelError::WriteTimeout`].
    pub async fn write_frame_timeout(&mut self, frame: Frame, wait: Duration) -> Result<()> {
        tokio::time::timeout(wait, self.write_frame(frame))
            .await
            .map_err(|_| ChannelError::WriteTimeout(wait))?
    }

    /// Flush and shut down the write half.
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await?;
        Ok(())
    }

    pub fn into_parts(self) -> (FrameReader, FrameWriter, Option<SocketAddr>) {
        (self.reader, self.writer, self.remote_addr)
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}
