use std::time::Duration;

use async_trait::async_trait;
use meshim_channel::Conn;

use crate::error::Result;

/// What a dialer needs to reach one remote instance.
#[derive(Debug, Clone)]
pub struct DialerContext {
    /// Remote service id.
    pub id: String,
    /// Remote service name.
    pub name: String,
    /// Dial URL of the remote instance.
    pub address: String,
    pub timeout: Duration,
}

/// Opens an outbound connection and identifies this process to the peer.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial_and_handshake(&self, ctx: DialerContext) -> Result<Conn>;
}
