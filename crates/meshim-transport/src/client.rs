use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use meshim_channel::{
    Event, FrameReader, FrameWriter, DEFAULT_LOGIN_WAIT, DEFAULT_READ_WAIT, DEFAULT_WRITE_WAIT,
};
use meshim_frame::{Frame, OpCode};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::dialer::{Dialer, DialerContext};
use crate::error::{Result, TransportError};

/// Interval between client Pings.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(55);

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Ping interval; zero disables heartbeats and the read deadline.
    pub heartbeat: Duration,
    pub read_wait: Duration,
    pub write_wait: Duration,
    /// Connect and handshake budget.
    pub dial_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            read_wait: DEFAULT_READ_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            dial_timeout: DEFAULT_LOGIN_WAIT,
        }
    }
}

/// One outbound connection to a remote service instance.
pub struct Client {
    id: String,
    name: String,
    meta: HashMap<String, String>,
    options: ClientOptions,
    dialer: Arc<dyn Dialer>,
    connected: AtomicBool,
    reader: Mutex<Option<FrameReader>>,
    writer: Arc<Mutex<Option<FrameWriter>>>,
    closed: Event,
}

impl Client {
    /// `id` and `name` are the remote instance's service id and name.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        dialer: Arc<dyn Dialer>,
        options: ClientOptions,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            meta: HashMap::new(),
            options,
            dialer,
            connected: AtomicBool::new(false),
            reader: Mutex::new(None),
            writer: Arc::new(Mutex::new(None)),
            closed: Event::new(),
        }
    }

    pub fn with_meta(mut self, meta: HashMap<String, String>) -> Self {
        self.meta = meta;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &HashMap<String, String> {
        &self.meta
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.closed.has_fired()
    }

    /// Dial `addr` and run the handshake. Only the first concurrent call
    /// proceeds; a failed dial allows another attempt.
    pub async fn connect(&self, addr: &str) -> Result<()> {
        if self.closed.has_fired() {
            return Err(TransportError::Closed(self.id.clone()));
        }
        if self
            .connected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::AlreadyConnected(self.id.clone()));
        }

        let dialed = self
            .dialer
            .dial_and_handshake(DialerContext {
                id: self.id.clone(),
                name: self.name.clone(),
                address: addr.to_string(),
                timeout: self.options.dial_timeout,
            })
            .await;
        let conn = match dialed {
            Ok(conn) => conn,
            Err(err) => {
                self.connected.store(false, Ordering::Release);
                return Err(err);
            }
        };

        let (reader, writer, _) = conn.into_parts();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);

        if !self.options.heartbeat.is_zero() {
            tokio::spawn(heartbeat_loop(
                self.id.clone(),
                Arc::clone(&self.writer),
                self.closed.clone(),
                self.options.clone(),
            ));
        }
        debug!(id = %self.id, name = %self.name, address = %addr, "client connected");
        Ok(())
    }

    /// Write `payload` as one Binary frame.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        if self.closed.has_fired() {
            return Err(TransportError::Closed(self.id.clone()));
        }
        let wait = self.options.write_wait;
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected(self.id.clone()))?;
        tokio::time::timeout(wait, writer.send(Frame::binary(payload)))
            .await
            .map_err(|_| TransportError::WriteTimeout(wait))??;
        Ok(())
    }

    /// Read the next frame. A Close frame from the peer ends the connection
    /// with [`TransportError::RemoteClosed`]; a local close with
    /// [`TransportError::Closed`].
    pub async fn read(&self) -> Result<Frame> {
        let mut reader = self.reader.lock().await;
        let reader = reader
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected(self.id.clone()))?;

        let next = async {
            if self.options.heartbeat.is_zero() {
                Ok(reader.next().await)
            } else {
                let wait = self.options.read_wait;
                tokio::time::timeout(wait, reader.next())
                    .await
                    .map_err(|_| TransportError::ReadTimeout(wait))
            }
        };
        let next = tokio::select! {
            biased;
            _ = self.closed.done() => return Err(TransportError::Closed(self.id.clone())),
            next = next => next?,
        };

        let frame = match next {
            Some(frame) => frame?,
            None => return Err(TransportError::ConnectionClosed),
        };
        if frame.opcode == OpCode::Close {
            return Err(TransportError::RemoteClosed);
        }
        Ok(frame)
    }

    /// Say goodbye to the peer and shut the connection down. Idempotent.
    pub async fn close(&self) {
        if !self.closed.fire() {
            return;
        }
        let wait = self.options.write_wait;
        let mut writer = self.writer.lock().await;
        if let Some(writer) = writer.as_mut() {
            let goodbye = async {
                writer.send(Frame::close(Bytes::new())).await?;
                writer.close().await
            };
            if let Ok(Err(err)) = tokio::time::timeout(wait, goodbye).await {
                debug!(id = %self.id, error = %err, "close frame not delivered");
            }
        }
        *writer = None;
        self.connected.store(false, Ordering::Release);
        debug!(id = %self.id, "client closed");
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

async fn heartbeat_loop(
    id: String,
    writer: Arc<Mutex<Option<FrameWriter>>>,
    closed: Event,
    options: ClientOptions,
) {
    let mut tick = tokio::time::interval(options.heartbeat);
    tick.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = closed.done() => return,
            _ = tick.tick() => {}
        }
        trace!(id = %id, "send ping to server");
        let mut guard = writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return;
        };
        match tokio::time::timeout(options.write_wait, writer.send(Frame::ping())).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(id = %id, error = %err, "heartbeat loop stopped");
                return;
            }
            Err(_) => {
                warn!(id = %id, "heartbeat write timed out");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use meshim_channel::Conn;

    use super::*;

    /// Hands out one end of a duplex pair per dial.
    struct DuplexDialer {
        peers: std::sync::Mutex<Vec<tokio::io::DuplexStream>>,
    }

    #[async_trait]
    impl Dialer for DuplexDialer {
        async fn dial_and_handshake(&self, _ctx: DialerContext) -> Result<Conn> {
            let (local, remote) = tokio::io::duplex(4096);
            self.peers.lock().expect("dialer lock").push(remote);
            Ok(Conn::new(local))
        }
    }

    struct RefusingDialer;

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial_and_handshake(&self, ctx: DialerContext) -> Result<Conn> {
            Err(TransportError::Handshake(format!("refused {}", ctx.address)))
        }
    }

    fn quiet() -> ClientOptions {
        ClientOptions {
            heartbeat: Duration::ZERO,
            ..ClientOptions::default()
        }
    }

    fn duplex_client(options: ClientOptions) -> (Client, Arc<DuplexDialer>) {
        let dialer = Arc::new(DuplexDialer {
            peers: std::sync::Mutex::new(Vec::new()),
        });
        let client = Client::new("chat-1", "chat", dialer.clone(), options);
        (client, dialer)
    }

    fn take_peer(dialer: &DuplexDialer) -> Conn {
        Conn::new(dialer.peers.lock().expect("dialer lock").remove(0))
    }

    #[tokio::test]
    async fn connect_is_single_shot() {
        let (client, _dialer) = duplex_client(quiet());
        client.connect("mem").await.expect("first connect should succeed");
        let err = client.connect("mem").await.expect_err("second connect should fail");
        assert!(matches!(err, TransportError::AlreadyConnected(id) if id == "chat-1"));
    }

    #[tokio::test]
    async fn failed_dial_allows_retry() {
        let client = Client::new("chat-1", "chat", Arc::new(RefusingDialer), quiet());
        let err = client.connect("mem").await.expect_err("dial should fail");
        assert!(matches!(err, TransportError::Handshake(_)));
        assert!(!client.is_connected());
        let err = client.connect("mem").await.expect_err("dial should fail again");
        assert!(matches!(err, TransportError::Handshake(_)));
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let (client, _dialer) = duplex_client(quiet());
        let err = client
            .send(Bytes::from_static(b"x"))
            .await
            .expect_err("not connected");
        assert!(matches!(err, TransportError::NotConnected(_)));
    }

    #[tokio::test]
    async fn send_read_and_remote_close() {
        let (client, dialer) = duplex_client(quiet());
        client.connect("mem").await.expect("connect should succeed");
        let mut peer = take_peer(&dialer);

        client
            .send(Bytes::from_static(b"hello"))
            .await
            .expect("send should succeed");
        let frame = peer.read_frame().await.expect("peer should read");
        assert_eq!(&frame.payload[..], b"hello");

        peer.write_frame(Frame::binary("reply"))
            .await
            .expect("reply should send");
        peer.write_frame(Frame::close("bye"))
            .await
            .expect("close should send");
        let reply = client.read().await.expect("reply should arrive");
        assert_eq!(&reply.payload[..], b"reply");
        let err = client.read().await.expect_err("close should end reads");
        assert!(matches!(err, TransportError::RemoteClosed));
    }

    #[tokio::test]
    async fn close_sends_close_frame_once() {
        let (client, dialer) = duplex_client(quiet());
        client.connect("mem").await.expect("connect should succeed");
        let mut peer = take_peer(&dialer);

        client.close().await;
        client.close().await;

        let frame = peer.read_frame().await.expect("close frame should arrive");
        assert_eq!(frame.opcode, OpCode::Close);
        let err = peer.read_frame().await.expect_err("then EOF");
        assert!(matches!(err, meshim_channel::ChannelError::ConnectionClosed));

        let err = client
            .send(Bytes::from_static(b"late"))
            .await
            .expect_err("send after close");
        assert!(matches!(err, TransportError::Closed(_)));
        let err = client.read().await.expect_err("read after close");
        assert!(matches!(err, TransportError::Closed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_sends_pings() {
        let options = ClientOptions {
            heartbeat: Duration::from_secs(1),
            ..ClientOptions::default()
        };
        let (client, dialer) = duplex_client(options);
        client.connect("mem").await.expect("connect should succeed");
        let mut peer = take_peer(&dialer);

        for _ in 0..2 {
            let frame = peer.read_frame().await.expect("ping should arrive");
            assert_eq!(frame.opcode, OpCode::Ping);
        }
        client.close().await;
    }
}
