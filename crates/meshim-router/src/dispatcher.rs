use async_trait::async_trait;
use meshim_mesh::Container;
use meshim_packet::LogicPkt;

use crate::error::Result;

/// Delivers a packet to channels behind a gateway.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Push `packet` once to `gateway`, addressed to every id in `channels`.
    async fn push(&self, gateway: &str, channels: &[String], packet: LogicPkt) -> Result<()>;
}

#[async_trait]
impl Dispatcher for Container {
    async fn push(&self, gateway: &str, channels: &[String], packet: LogicPkt) -> Result<()> {
        Container::push(self, gateway, channels, packet).await?;
        Ok(())
    }
}
