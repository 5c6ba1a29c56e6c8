//! Client-facing gateway: logs end users in and relays their packets into
//! the mesh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use meshim_channel::{Acceptor, Agent, ChannelError, Conn, MessageListener, StateListener};
use meshim_frame::{Frame, OpCode};
use meshim_mesh::{Container, MeshError};
use meshim_packet::{
    next_sequence, read_packet, BasicPkt, Flag, LogicPkt, LoginReq, Packet, Session, Status,
    CODE_PING, COMMAND_LOGIN_SIGN_IN, COMMAND_LOGIN_SIGN_OUT, SN_LOGIN,
};
use tracing::{error, info, warn};

/// Sends packets to some instance of a named service.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, service_name: &str, packet: LogicPkt) -> Result<(), MeshError>;
}

#[async_trait]
impl Forwarder for Container {
    async fn forward(&self, service_name: &str, packet: LogicPkt) -> Result<(), MeshError> {
        Container::forward(self, service_name, packet).await
    }
}

/// `<serviceId>_<account>_<seq>`, unique per gateway process.
pub fn generate_channel_id(service_id: &str, account: &str) -> String {
    format!("{service_id}_{account}_{}", next_sequence())
}

/// Acceptor and listeners of the gateway's client-facing server.
///
/// A login is held back until its channel is registered, so the login
/// service's answer always finds the channel.
pub struct GatewayHandler {
    service_id: String,
    forwarder: Arc<dyn Forwarder>,
    pending: DashMap<String, LogicPkt>,
}

impl GatewayHandler {
    pub fn new(service_id: impl Into<String>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            service_id: service_id.into(),
            forwarder,
            pending: DashMap::new(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    async fn reject(conn: &mut Conn, request: &LogicPkt, status: Status) {
        let mut resp = LogicPkt::new_from(&request.header);
        resp.header.status = status;
        resp.header.flag = Flag::Response;
        match resp.marshal() {
            Ok(payload) => {
                if let Err(err) = conn.write_frame(Frame::binary(payload)).await {
                    warn!(error = %err, "login rejection not delivered");
                }
            }
            Err(err) => warn!(error = %err, "login rejection not encodable"),
        }
    }
}

#[async_trait]
impl Acceptor for GatewayHandler {
    async fn accept(&self, conn: &mut Conn, login_wait: Duration) -> Result<String, ChannelError> {
        let frame = conn.read_frame_timeout(login_wait).await?;
        if frame.opcode != OpCode::Binary {
            return Err(ChannelError::Rejected(format!(
                "expected a Binary login frame, got {}",
                frame.opcode.name()
            )));
        }
        let mut req = LogicPkt::decode(&frame.payload)
            .map_err(|err| ChannelError::Rejected(format!("invalid login packet: {err}")))?;
        if req.header.command != COMMAND_LOGIN_SIGN_IN {
            Self::reject(conn, &req, Status::InvalidCommand).await;
            return Err(ChannelError::Rejected(format!(
                "expected {COMMAND_LOGIN_SIGN_IN}, got {}",
                req.header.command
            )));
        }
        let login: LoginReq = match req.read_body() {
            Ok(login) => login,
            Err(err) => {
                Self::reject(conn, &req, Status::InvalidPacketBody).await;
                return Err(ChannelError::Rejected(format!("invalid login body: {err}")));
            }
        };
        if login.account.is_empty() {
            Self::reject(conn, &req, Status::Unauthorized).await;
            return Err(ChannelError::Rejected("empty account".to_string()));
        }

        let id = generate_channel_id(&self.service_id, &login.account);
        req.header.channel_id = id.clone();
        let session = Session {
            channel_id: id.clone(),
            gate_id: self.service_id.clone(),
            account: login.account,
            remote_ip: conn
                .remote_addr()
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
            device: login.device,
            app: login.app,
            ..Session::default()
        };
        req.write_body(&session)
            .map_err(|err| ChannelError::Rejected(err.to_string()))?;
        self.pending.insert(id.clone(), req);
        Ok(id)
    }

    async fn registered(&self, id: &str) -> Result<(), ChannelError> {
        let Some((_, login)) = self.pending.remove(id) else {
            return Ok(());
        };
        self.forwarder
            .forward(SN_LOGIN, login)
            .await
            .map_err(|err| ChannelError::Rejected(format!("login forward failed: {err}")))?;
        info!(channel = %id, "login forwarded");
        Ok(())
    }
}

#[async_trait]
impl MessageListener for GatewayHandler {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        let packet = match read_packet(&payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(id = %agent.id(), error = %err, "undecodable packet");
                return;
            }
        };
        match packet {
            Packet::Basic(basic) => {
                if basic.code == CODE_PING {
                    if let Err(err) = agent.push(BasicPkt::pong().marshal()) {
                        warn!(id = %agent.id(), error = %err, "pong failed");
                    }
                }
            }
            Packet::Logic(mut logic) => {
                logic.header.channel_id = agent.id().to_string();
                let service = logic.service_name().to_string();
                let command = logic.header.command.clone();
                if let Err(err) = self.forwarder.forward(&service, logic).await {
                    error!(id = %agent.id(), command = %command, error = %err, "forward failed");
                }
            }
        }
    }
}

#[async_trait]
impl StateListener for GatewayHandler {
    async fn disconnect(&self, id: &str) {
        info!(id = %id, "disconnect");
        self.pending.remove(id);
        let logout = LogicPkt::new(COMMAND_LOGIN_SIGN_OUT).with_channel(id);
        if let Err(err) = self.forwarder.forward(SN_LOGIN, logout).await {
            error!(id = %id, error = %err, "logout forward failed");
        }
    }
}
