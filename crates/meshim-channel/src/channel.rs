use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use meshim_frame::{Frame, FrameError, OpCode};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

use crate::conn::{Conn, FrameReader, FrameWriter};
use crate::error::{ChannelError, Result};
use crate::event::Event;
use crate::registry::Identified;
use crate::server::{Agent, MessageListener};

/// Outbound queue depth per channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;
/// Maximum silence before the read loop gives up on a peer.
pub const DEFAULT_READ_WAIT: Duration = Duration::from_secs(3 * 60);
/// Maximum time for one write burst.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub read_wait: Duration,
    pub write_wait: Duration,
    pub queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_wait: DEFAULT_READ_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct Waits {
    read_ms: AtomicU64,
    write_ms: AtomicU64,
}

impl Waits {
    fn new(config: &ChannelConfig) -> Self {
        Self {
            read_ms: AtomicU64::new(duration_ms(config.read_wait)),
            write_ms: AtomicU64::new(duration_ms(config.write_wait)),
        }
    }

    fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms.load(Ordering::Relaxed))
    }

    fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms.load(Ordering::Relaxed))
    }
}

fn duration_ms(wait: Duration) -> u64 {
    u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)
}

/// Server-side handle for one accepted connection.
///
/// Payloads pushed to the channel are written by a dedicated write loop that
/// coalesces everything already queued into one flush. Frames are read by
/// [`Channel::read_loop`]; only one read loop may run at a time.
pub struct Channel {
    id: String,
    reader: Mutex<FrameReader>,
    writer: Arc<Mutex<FrameWriter>>,
    queue: mpsc::Sender<Bytes>,
    closed: Event,
    waits: Arc<Waits>,
    remote_addr: Option<SocketAddr>,
}

impl Channel {
    /// Wrap an identified connection with the default config.
    ///
    /// Spawns the write loop, so this must run inside a tokio runtime.
    pub fn new(id: impl Into<String>, conn: Conn) -> Arc<Self> {
        Self::with_config(id, conn, ChannelConfig::default())
    }

    pub fn with_config(id: impl Into<String>, conn: Conn, config: ChannelConfig) -> Arc<Self> {
        let (reader, writer, remote_addr) = conn.into_parts();
        let (queue, outbound) = mpsc::channel(config.queue_capacity.max(1));
        let channel = Arc::new(Self {
            id: id.into(),
            reader: Mutex::new(reader),
            writer: Arc::new(Mutex::new(writer)),
            queue,
            closed: Event::new(),
            waits: Arc::new(Waits::new(&config)),
            remote_addr,
        });

        tokio::spawn(write_loop(
            channel.id.clone(),
            outbound,
            Arc::clone(&channel.writer),
            channel.closed.clone(),
            Arc::clone(&channel.waits),
        ));
        channel
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Queue a payload without waiting.
    ///
    /// Fails with [`ChannelError::QueueFull`] when the write loop is behind
    /// and with [`ChannelError::Closed`] once the channel has closed.
    pub fn push(&self, payload: impl Into<Bytes>) -> Result<()> {
        if self.closed.has_fired() {
            return Err(ChannelError::Closed(self.id.clone()));
        }
        self.queue.try_send(payload.into()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ChannelError::QueueFull(self.id.clone()),
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed(self.id.clone()),
        })
    }

    /// Queue a payload, waiting up to the write wait for room in the queue.
    ///
    /// Fails with [`ChannelError::WriteTimeout`] when the queue stays full
    /// for the whole write wait.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        if self.closed.has_fired() {
            return Err(ChannelError::Closed(self.id.clone()));
        }
        let wait = self.waits.write();
        tokio::select! {
            biased;
            _ = self.closed.done() => Err(ChannelError::Closed(self.id.clone())),
            sent = tokio::time::timeout(wait, self.queue.send(payload.into())) => match sent {
                Err(_) => Err(ChannelError::WriteTimeout(wait)),
                Ok(sent) => sent.map_err(|_| ChannelError::Closed(self.id.clone())),
            },
        }
    }

    /// Read frames until the peer closes, a read times out, the transport
    /// fails, or this channel is closed locally (`Ok(())`).
    ///
    /// Pings are answered inline. Non-empty Binary payloads are handed to
    /// `listener` on their own task.
    pub async fn read_loop(self: &Arc<Self>, listener: Arc<dyn MessageListener>) -> Result<()> {
        let mut reader = self.reader.lock().await;
        loop {
            let wait = self.waits.read();
            let next = tokio::select! {
                biased;
                _ = self.closed.done() => return Ok(()),
                next = tokio::time::timeout(wait, reader.next()) => next,
            };
            let frame = match next {
                Err(_) => return Err(ChannelError::ReadTimeout(wait)),
                Ok(None) => return Err(ChannelError::ConnectionClosed),
                Ok(Some(frame)) => frame?,
            };

            match frame.opcode {
                OpCode::Close => return Err(ChannelError::RemoteClosed),
                OpCode::Ping => {
                    trace!(id = %self.id, "recv a ping; resp with a pong");
                    self.write_control(Frame::pong()).await?;
                }
                OpCode::Pong => {}
                OpCode::Binary => {
                    if frame.payload.is_empty() {
                        continue;
                    }
                    let agent: Arc<dyn Agent> = Arc::clone(self) as Arc<dyn Agent>;
                    let listener = Arc::clone(&listener);
                    tokio::spawn(async move {
                        listener.receive(agent, frame.payload).await;
                    });
                }
            }
        }
    }

    /// Write a control frame directly, bypassing the outbound queue.
    pub async fn write_control(&self, frame: Frame) -> Result<()> {
        let wait = self.waits.write();
        let mut writer = self.writer.lock().await;
        tokio::time::timeout(wait, writer.send(frame))
            .await
            .map_err(|_| ChannelError::WriteTimeout(wait))??;
        Ok(())
    }

    /// Fire the close event. Returns true only for the call that closed it.
    ///
    /// The write loop exits and shuts down the write half; a running read
    /// loop returns `Ok(())`.
    pub fn close(&self) -> bool {
        let fired = self.closed.fire();
        if fired {
            debug!(id = %self.id, "channel closed");
        }
        fired
    }

    pub fn is_closed(&self) -> bool {
        self.closed.has_fired()
    }

    /// Resolves once the channel has closed.
    pub async fn closed(&self) {
        self.closed.done().await
    }

    /// Zero is ignored.
    pub fn set_read_wait(&self, wait: Duration) {
        if wait.is_zero() {
            return;
        }
        self.waits.read_ms.store(duration_ms(wait), Ordering::Relaxed);
    }

    /// Zero is ignored.
    pub fn set_write_wait(&self, wait: Duration) {
        if wait.is_zero() {
            return;
        }
        self.waits.write_ms.store(duration_ms(wait), Ordering::Relaxed);
    }

    pub fn read_wait(&self) -> Duration {
        self.waits.read()
    }

    pub fn write_wait(&self) -> Duration {
        self.waits.write()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.closed.has_fired())
            .finish_non_exhaustive()
    }
}

impl Identified for Channel {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Agent for Channel {
    fn id(&self) -> &str {
        &self.id
    }

    fn push(&self, payload: Bytes) -> Result<()> {
        Channel::push(self, payload)
    }
}

async fn write_loop(
    id: String,
    mut outbound: mpsc::Receiver<Bytes>,
    writer: Arc<Mutex<FrameWriter>>,
    closed: Event,
    waits: Arc<Waits>,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = closed.done() => break,
            next = outbound.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
        };

        let wait = waits.write();
        let burst = async {
            let mut writer = writer.lock().await;
            writer.feed(Frame::binary(payload)).await?;
            let mut batched = 1usize;
            while let Ok(payload) = outbound.try_recv() {
                writer.feed(Frame::binary(payload)).await?;
                batched += 1;
            }
            writer.flush().await?;
            Ok::<_, FrameError>(batched)
        };

        match tokio::time::timeout(wait, burst).await {
            Ok(Ok(batched)) => trace!(id = %id, batched, "flushed"),
            Ok(Err(err)) => {
                warn!(id = %id, error = %err, "write loop failed");
                closed.fire();
                break;
            }
            Err(_) => {
                warn!(id = %id, wait = ?wait, "write timed out");
                closed.fire();
                break;
            }
        }
    }

    let wait = waits.write();
    let shutdown = async {
        let mut writer = writer.lock().await;
        writer.close().await
    };
    if let Ok(Err(err)) = tokio::time::timeout(wait, shutdown).await {
        debug!(id = %id, error = %err, "write half shutdown failed");
    }
    debug!(id = %id, "write loop exited");
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use bytes::BytesMut;
    use meshim_frame::decode_frame;
    use tokio::io::AsyncWrite;

    use super::*;

    /// Records every write and flush reaching the transport.
    #[derive(Clone, Default)]
    struct RecordingWriter {
        bytes: Arc<StdMutex<Vec<u8>>>,
        writes: Arc<AtomicUsize>,
        flushes: Arc<AtomicUsize>,
    }

    impl RecordingWriter {
        fn frames(&self) -> Vec<Frame> {
            let mut buf = BytesMut::from(&self.bytes.lock().expect("writer lock")[..]);
            let mut frames = Vec::new();
            while let Some(frame) =
                decode_frame(&mut buf, meshim_frame::DEFAULT_MAX_PAYLOAD).expect("recorded frame")
            {
                frames.push(frame);
            }
            frames
        }
    }

    impl AsyncWrite for RecordingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.bytes.lock().expect("writer lock").extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[derive(Default)]
    struct CountingListener {
        received: StdMutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl MessageListener for CountingListener {
        async fn receive(&self, _agent: Arc<dyn Agent>, payload: Bytes) {
            self.received.lock().expect("listener lock").push(payload);
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition should become true");
    }

    #[tokio::test]
    async fn burst_is_coalesced_into_one_flush() {
        let sink = RecordingWriter::default();
        let channel = Channel::new("ch-1", Conn::from_parts(tokio::io::empty(), sink.clone()));

        for i in 0..5u8 {
            channel.push(vec![i]).expect("push should fit in the queue");
        }
        wait_for(|| sink.flushes.load(Ordering::SeqCst) > 0).await;

        assert_eq!(sink.flushes.load(Ordering::SeqCst), 1);
        assert!(sink.writes.load(Ordering::SeqCst) <= 5);
        let payloads: Vec<u8> = sink.frames().iter().map(|f| f.payload[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
        assert!(sink.frames().iter().all(|f| f.opcode == OpCode::Binary));
    }

    #[tokio::test]
    async fn full_queue_reports_backpressure() {
        let sink = RecordingWriter::default();
        let channel = Channel::new("ch-1", Conn::from_parts(tokio::io::empty(), sink));

        for i in 0..DEFAULT_QUEUE_CAPACITY {
            channel.push(vec![i as u8]).expect("push should fit");
        }
        let err = channel.push("overflow").expect_err("sixth push should fail");
        assert!(matches!(err, ChannelError::QueueFull(id) if id == "ch-1"));
    }

    #[tokio::test]
    async fn send_waits_for_room_instead_of_failing() {
        let sink = RecordingWriter::default();
        let channel = Channel::new("ch-1", Conn::from_parts(tokio::io::empty(), sink.clone()));

        for i in 0..DEFAULT_QUEUE_CAPACITY {
            channel.push(vec![i as u8]).expect("push should fit");
        }
        for i in DEFAULT_QUEUE_CAPACITY..8 {
            channel.send(vec![i as u8]).await.expect("send should wait for room");
        }
        wait_for(|| sink.frames().len() == 8).await;

        let payloads: Vec<u8> = sink.frames().iter().map(|f| f.payload[0]).collect();
        assert_eq!(payloads, (0..8).collect::<Vec<u8>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_close_fires_once() {
        let channel = Channel::new(
            "ch-1",
            Conn::from_parts(tokio::io::empty(), RecordingWriter::default()),
        );
        let wins = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let channel = Arc::clone(&channel);
            let wins = Arc::clone(&wins);
            tasks.push(tokio::spawn(async move {
                if channel.close() {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            task.await.expect("close task should not panic");
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(channel.is_closed());
        for _ in 0..3 {
            let err = channel.push("late").expect_err("push after close should fail");
            assert!(matches!(err, ChannelError::Closed(_)));
        }
        let err = channel.send("late").await.expect_err("send after close should fail");
        assert!(matches!(err, ChannelError::Closed(_)));
    }

    #[tokio::test]
    async fn ping_is_answered_and_not_delivered() {
        let (local, remote) = tokio::io::duplex(4096);
        let channel = Channel::new("ch-1", Conn::new(local));
        let mut peer = Conn::new(remote);
        let listener = Arc::new(CountingListener::default());

        peer.write_frame(Frame::ping()).await.expect("ping should send");
        peer.write_frame(Frame::close("bye")).await.expect("close should send");

        let err = channel
            .read_loop(listener.clone())
            .await
            .expect_err("read loop should end on close");
        assert!(matches!(err, ChannelError::RemoteClosed));
        channel.close();

        let mut replies = Vec::new();
        loop {
            match peer.read_frame().await {
                Ok(frame) => replies.push(frame.opcode),
                Err(ChannelError::ConnectionClosed) => break,
                Err(err) => panic!("unexpected read error: {err}"),
            }
        }
        assert_eq!(replies, vec![OpCode::Pong]);
        assert!(listener.received.lock().expect("listener lock").is_empty());
    }

    #[tokio::test]
    async fn binary_payloads_reach_listener() {
        let (local, remote) = tokio::io::duplex(4096);
        let channel = Channel::new("ch-1", Conn::new(local));
        let mut peer = Conn::new(remote);
        let listener = Arc::new(CountingListener::default());

        peer.write_frame(Frame::binary("one")).await.expect("write should succeed");
        peer.write_frame(Frame::binary(Bytes::new()))
            .await
            .expect("write should succeed");
        peer.write_frame(Frame::binary("two")).await.expect("write should succeed");
        drop(peer);

        let err = channel
            .read_loop(listener.clone())
            .await
            .expect_err("read loop should end at EOF");
        assert!(matches!(err, ChannelError::ConnectionClosed));

        wait_for(|| listener.received.lock().expect("listener lock").len() == 2).await;
        let mut got: Vec<Bytes> = listener.received.lock().expect("listener lock").clone();
        got.sort();
        assert_eq!(got, vec![Bytes::from("one"), Bytes::from("two")]);
    }

    #[tokio::test]
    async fn local_close_ends_read_loop_cleanly() {
        let (local, _remote) = tokio::io::duplex(64);
        let channel = Channel::new("ch-1", Conn::new(local));
        let listener: Arc<dyn MessageListener> = Arc::new(CountingListener::default());

        let reader = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.read_loop(listener).await })
        };
        tokio::task::yield_now().await;
        assert!(channel.close());

        reader
            .await
            .expect("reader task should finish")
            .expect("local close should end the loop with Ok");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (local, _remote) = tokio::io::duplex(64);
        let channel = Channel::new("ch-1", Conn::new(local));
        channel.set_read_wait(Duration::from_secs(2));
        channel.set_read_wait(Duration::ZERO);
        assert_eq!(channel.read_wait(), Duration::from_secs(2));

        let err = channel
            .read_loop(Arc::new(CountingListener::default()))
            .await
            .expect_err("silent peer should time out");
        assert!(matches!(err, ChannelError::ReadTimeout(wait) if wait == Duration::from_secs(2)));
    }
}
