use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use meshim_naming::ServiceRegistration;

use crate::conn::Conn;
use crate::error::Result;

/// How long an acceptor may take to identify a new connection.
pub const DEFAULT_LOGIN_WAIT: Duration = Duration::from_secs(10);

/// Something a listener can answer on: a channel or a mesh client.
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    /// Queue `payload` for delivery without waiting.
    fn push(&self, payload: Bytes) -> Result<()>;
}

/// Receives every non-empty Binary payload read from a channel.
///
/// Each call runs on its own task, so payloads from one channel may be
/// handled out of order.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes);
}

/// Identifies a freshly accepted connection.
///
/// Returns the channel id, or an error to drop the connection.
#[async_trait]
pub trait Acceptor: Send + Sync {
    async fn accept(&self, conn: &mut Conn, login_wait: Duration) -> Result<String>;

    /// Runs once the channel `id` is registered, before its read loop
    /// starts. Pushes addressed to `id` can be delivered from here on.
    /// An error closes the channel without a disconnect notification.
    async fn registered(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// Told when a channel's read loop has ended and the channel is gone.
#[async_trait]
pub trait StateListener: Send + Sync {
    async fn disconnect(&self, id: &str);
}

/// The local server the mesh container drives.
#[async_trait]
pub trait Server: Send + Sync {
    /// How this process announces itself to discovery.
    fn registration(&self) -> &ServiceRegistration;

    fn service_id(&self) -> &str {
        &self.registration().id
    }

    /// Accept connections until shut down.
    async fn start(&self) -> Result<()>;

    /// Queue `payload` on the channel registered under `channel_id`
    /// without waiting. Meant for client-facing channels.
    fn push(&self, channel_id: &str, payload: Bytes) -> Result<()>;

    /// Queue `payload` on the channel registered under `channel_id`,
    /// waiting up to the write wait for room. Meant for mesh links, where
    /// one channel carries traffic for many users.
    async fn send(&self, channel_id: &str, payload: Bytes) -> Result<()>;

    /// Close every channel and stop accepting, bounded by `deadline`.
    async fn shutdown(&self, deadline: Duration) -> Result<()>;
}
