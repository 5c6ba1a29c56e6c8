use std::time::Duration;

use async_trait::async_trait;
use meshim_channel::{Acceptor, ChannelError, Conn};
use meshim_frame::{Frame, OpCode};
use meshim_packet::InnerHandshakeReq;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::dialer::{Dialer, DialerContext};
use crate::error::{Result, TransportError};

/// Dials remote instances over TCP and announces this process's service id
/// as the first Binary frame.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    service_id: String,
}

impl TcpDialer {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial_and_handshake(&self, ctx: DialerContext) -> Result<Conn> {
        let stream = tokio::time::timeout(ctx.timeout, TcpStream::connect(&ctx.address))
            .await
            .map_err(|_| TransportError::DialTimeout {
                addr: ctx.address.clone(),
                wait: ctx.timeout,
            })?
            .map_err(|source| TransportError::Connect {
                addr: ctx.address.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let mut conn = Conn::new(stream).with_remote_addr(peer);
        let req = InnerHandshakeReq {
            service_id: self.service_id.clone(),
        };
        let payload = serde_json::to_vec(&req).map_err(meshim_packet::PacketError::from)?;
        conn.write_frame_timeout(Frame::binary(payload), ctx.timeout)
            .await?;
        info!(remote = %ctx.id, address = %ctx.address, "inner handshake sent");
        Ok(conn)
    }
}

/// Accepts connections from other mesh processes: the channel is named after
/// the service id the caller announces.
#[derive(Debug, Clone, Copy, Default)]
pub struct InnerAcceptor;

impl InnerAcceptor {
    /// Read and decode the handshake frame.
    pub async fn read_handshake(
        conn: &mut Conn,
        login_wait: Duration,
    ) -> std::result::Result<InnerHandshakeReq, ChannelError> {
        let frame = conn.read_frame_timeout(login_wait).await?;
        if frame.opcode != OpCode::Binary {
            return Err(ChannelError::Rejected(format!(
                "expected a Binary handshake frame, got {}",
                frame.opcode.name()
            )));
        }
        serde_json::from_slice::<InnerHandshakeReq>(&frame.payload)
            .map_err(|err| ChannelError::Rejected(format!("invalid handshake: {err}")))
    }
}

#[async_trait]
impl Acceptor for InnerAcceptor {
    async fn accept(
        &self,
        conn: &mut Conn,
        login_wait: Duration,
    ) -> std::result::Result<String, ChannelError> {
        let req = Self::read_handshake(conn, login_wait).await?;
        if req.service_id.is_empty() {
            return Err(ChannelError::Rejected("empty service id".to_string()));
        }
        debug!(service_id = %req.service_id, "inner handshake accepted");
        Ok(req.service_id)
    }
}
