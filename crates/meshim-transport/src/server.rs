use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use meshim_channel::{
    Acceptor, Channel, ChannelConfig, ChannelError, ChannelRegistry, Conn, Event,
    MessageListener, Result, Server, StateListener, DEFAULT_LOGIN_WAIT, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_READ_WAIT, DEFAULT_WRITE_WAIT,
};
use meshim_frame::Frame;
use meshim_naming::ServiceRegistration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Reason carried by the Close frame sent to a duplicate connection.
pub const REASON_DUPLICATE_CHANNEL: &str = "channelId is repeated";

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub login_wait: Duration,
    pub read_wait: Duration,
    pub write_wait: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            login_wait: DEFAULT_LOGIN_WAIT,
            read_wait: DEFAULT_READ_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
        }
    }
}

/// Names every connection with a fresh unique id.
#[derive(Debug, Default)]
pub struct RandomAcceptor {
    next: AtomicU64,
}

#[async_trait]
impl Acceptor for RandomAcceptor {
    async fn accept(&self, _conn: &mut Conn, _login_wait: Duration) -> Result<String> {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        Ok(format!("{nanos:x}{seq:04x}"))
    }
}

/// TCP implementation of the local server.
///
/// Each accepted socket is identified by the [`Acceptor`], registered as a
/// [`Channel`] and read until it ends; the channel is then removed and the
/// [`StateListener`] told.
pub struct TcpServer {
    listen: String,
    registration: ServiceRegistration,
    channels: Arc<ChannelRegistry>,
    acceptor: Arc<dyn Acceptor>,
    message_listener: Option<Arc<dyn MessageListener>>,
    state_listener: Option<Arc<dyn StateListener>>,
    options: ServerOptions,
    prebound: Mutex<Option<TcpListener>>,
    quit: Event,
}

impl TcpServer {
    pub fn new(listen: impl Into<String>, registration: ServiceRegistration) -> Self {
        Self {
            listen: listen.into(),
            registration,
            channels: Arc::new(ChannelRegistry::new()),
            acceptor: Arc::new(RandomAcceptor::default()),
            message_listener: None,
            state_listener: None,
            options: ServerOptions::default(),
            prebound: Mutex::new(None),
            quit: Event::new(),
        }
    }

    /// Serve on an already bound listener instead of binding at start.
    pub fn from_listener(listener: TcpListener, registration: ServiceRegistration) -> Self {
        let listen = listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        Self {
            prebound: Mutex::new(Some(listener)),
            ..Self::new(listen, registration)
        }
    }

    pub fn with_acceptor(mut self, acceptor: Arc<dyn Acceptor>) -> Self {
        self.acceptor = acceptor;
        self
    }

    pub fn with_message_listener(mut self, listener: Arc<dyn MessageListener>) -> Self {
        self.message_listener = Some(listener);
        self
    }

    pub fn with_state_listener(mut self, listener: Arc<dyn StateListener>) -> Self {
        self.state_listener = Some(listener);
        self
    }

    /// Share a channel registry with other components.
    pub fn with_channels(mut self, channels: Arc<ChannelRegistry>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.channels
    }

    pub fn listen_addr(&self) -> &str {
        &self.listen
    }

    async fn bind(&self) -> Result<TcpListener> {
        let prebound = self
            .prebound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(listener) = prebound {
            return Ok(listener);
        }
        Ok(TcpListener::bind(&self.listen).await?)
    }
}

#[async_trait]
impl Server for TcpServer {
    fn registration(&self) -> &ServiceRegistration {
        &self.registration
    }

    async fn start(&self) -> Result<()> {
        let message_listener = self
            .message_listener
            .clone()
            .ok_or_else(|| ChannelError::Misconfigured("message listener is not set".into()))?;
        let state_listener = self
            .state_listener
            .clone()
            .ok_or_else(|| ChannelError::Misconfigured("state listener is not set".into()))?;

        let listener = self.bind().await?;
        let local = listener.local_addr()?;
        info!(listen = %local, id = %self.service_id(), "started");

        let session = Arc::new(ServeContext {
            channels: Arc::clone(&self.channels),
            acceptor: Arc::clone(&self.acceptor),
            message_listener,
            state_listener,
            options: self.options.clone(),
        });

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.quit.done() => {
                    info!(listen = %local, "listen exited");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };
            tokio::spawn(Arc::clone(&session).serve(stream, peer));
        }
    }

    fn push(&self, channel_id: &str, payload: Bytes) -> Result<()> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| ChannelError::ChannelNotFound(channel_id.to_string()))?;
        channel.push(payload)
    }

    async fn send(&self, channel_id: &str, payload: Bytes) -> Result<()> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| ChannelError::ChannelNotFound(channel_id.to_string()))?;
        channel.send(payload).await
    }

    async fn shutdown(&self, deadline: Duration) -> Result<()> {
        if !self.quit.fire() {
            return Ok(());
        }
        let until = Instant::now() + deadline;
        for channel in self.channels.all() {
            channel.close();
            if Instant::now() >= until {
                warn!(id = %self.service_id(), "shutdown deadline reached");
                break;
            }
        }
        info!(id = %self.service_id(), "shutdown");
        Ok(())
    }
}

/// Everything a connection task needs from the server.
struct ServeContext {
    channels: Arc<ChannelRegistry>,
    acceptor: Arc<dyn Acceptor>,
    message_listener: Arc<dyn MessageListener>,
    state_listener: Arc<dyn StateListener>,
    options: ServerOptions,
}

impl ServeContext {
    async fn serve(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(remote = %peer, error = %err, "set_nodelay failed");
        }
        let mut conn = Conn::new(stream).with_remote_addr(peer);

        let id = match self.acceptor.accept(&mut conn, self.options.login_wait).await {
            Ok(id) => id,
            Err(err) => {
                debug!(remote = %peer, error = %err, "accept rejected");
                self.reject(conn, err.to_string()).await;
                return;
            }
        };
        if self.channels.contains(&id) {
            warn!(id = %id, "channel existed");
            self.reject(conn, REASON_DUPLICATE_CHANNEL.to_string()).await;
            return;
        }

        let channel = Channel::with_config(
            id,
            conn,
            ChannelConfig {
                read_wait: self.options.read_wait,
                write_wait: self.options.write_wait,
                queue_capacity: DEFAULT_QUEUE_CAPACITY,
            },
        );
        if !self.channels.try_add(Arc::clone(&channel)) {
            warn!(id = %channel.id(), "channel existed");
            let _ = channel
                .write_control(Frame::close(REASON_DUPLICATE_CHANNEL))
                .await;
            channel.close();
            return;
        }

        if let Err(err) = self.acceptor.registered(channel.id()).await {
            warn!(id = %channel.id(), error = %err, "channel dropped after registration");
            self.channels.remove(channel.id());
            let _ = channel.write_control(Frame::close(err.to_string())).await;
            channel.close();
            return;
        }

        info!(id = %channel.id(), remote = %peer, "accept");
        if let Err(err) = channel.read_loop(Arc::clone(&self.message_listener)).await {
            info!(id = %channel.id(), error = %err, "read loop ended");
        }
        self.channels.remove(channel.id());
        self.state_listener.disconnect(channel.id()).await;
        channel.close();
    }

    async fn reject(&self, mut conn: Conn, reason: String) {
        let _ = conn
            .write_frame_timeout(Frame::close(reason), self.options.write_wait)
            .await;
        let _ = conn.close().await;
    }
}
