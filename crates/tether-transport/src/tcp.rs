//! Persistent stream transport over TCP.
//!
//! Each [`TcpConnection`] runs one background read task. Outbound packets
//! go through a FIFO queue with at most one write in flight: whoever
//! pushes onto an empty queue starts a drain task, and the drain task
//! alone starts the next write when the previous one completes.
//!
//! Failures inside the background tasks close the connection and reach
//! the consumer as packets: an `Error` carrying the reason (if any)
//! followed by exactly one `Disconnect`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tether_buffer::{Buffer, BufferPool, Pooled, Shared};
use tether_protocol::{Message, ObjectCodec, PlayerId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::{
    Connection, ConnectionId, ConnectionStage, FrameDecoder, FrameStatus, Handshake, Step,
    Transport, TransportConfig, TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Shared connection state
// ---------------------------------------------------------------------------

struct ConnectionShared {
    id: ConnectionId,
    remote: SocketAddr,
    config: TransportConfig,
    pool: BufferPool,
    codec: ObjectCodec,
    stage: watch::Sender<ConnectionStage>,
    handshake: Mutex<Handshake>,
    player_id: Mutex<Option<PlayerId>>,
    inbound: Mutex<VecDeque<Pooled<Buffer>>>,
    inbound_ready: Notify,
    outbound: Mutex<VecDeque<Shared<Buffer>>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    // set once the terminal packets are queued
    finished: AtomicBool,
    error: Mutex<Option<TransportError>>,
    last_activity: Mutex<Instant>,
}

impl ConnectionShared {
    fn current_stage(&self) -> ConnectionStage {
        *self.stage.borrow()
    }

    fn encode(&self, message: &Message) -> Result<Pooled<Buffer>, TransportError> {
        let mut buf = self.pool.acquire();
        message.encode(&self.codec, &mut buf)?;
        Ok(buf)
    }

    fn deliver(&self, packet: Pooled<Buffer>) {
        self.inbound.lock().push_back(packet);
        self.inbound_ready.notify_waiters();
    }

    fn send_packet(self: &Arc<Self>, packet: Shared<Buffer>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        let start = {
            let mut outbound = self.outbound.lock();
            outbound.push_back(packet);
            outbound.len() == 1
        };
        // terminate may have cleared the queue between the check and the push
        if self.closed.load(Ordering::Acquire) {
            self.outbound.lock().clear();
            return Err(TransportError::NotConnected);
        }
        if start {
            tokio::spawn(drain_outbound(Arc::clone(self)));
        }
        Ok(())
    }

    fn send_message(self: &Arc<Self>, message: &Message) -> Result<(), TransportError> {
        let buf = self.encode(message)?;
        self.send_packet(buf.share())
    }

    /// Writes `messages` straight to the socket, bypassing the queue. Used
    /// for the last words of a rejected handshake.
    async fn write_direct(&self, messages: &[Message]) {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return;
        };
        for message in messages {
            let buf = match self.encode(message) {
                Ok(buf) => buf,
                Err(e) => {
                    warn!(id = %self.id, error = %e, "failed to encode handshake reply");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(buf.as_slice()).await {
                debug!(id = %self.id, error = %e, "handshake reply not delivered");
                return;
            }
        }
        let _ = writer.flush().await;
    }

    async fn handle_packet(self: &Arc<Self>, mut packet: Pooled<Buffer>) -> Result<(), TransportError> {
        let stage = self.handshake.lock().stage();
        if stage.is_connected() {
            self.deliver(packet);
            return Ok(());
        }

        let message = Message::decode(&self.codec, &mut packet)?;
        let step = self.handshake.lock().receive(&message);
        match step {
            Step::Deliver => self.deliver(packet),
            Step::Discard => {
                trace!(id = %self.id, kind = %message.kind(), "discarding packet before verification");
            }
            Step::Accepted { player_id, reply } => {
                *self.player_id.lock() = Some(player_id);
                if let Some(reply) = reply {
                    self.send_message(&reply)?;
                }
                *self.last_activity.lock() = Instant::now();
                self.stage.send_replace(ConnectionStage::Connected);
                info!(id = %self.id, remote = %self.remote, %player_id, "connection verified");
            }
            Step::Rejected { error, replies } => {
                self.write_direct(&replies).await;
                return Err(error);
            }
        }
        Ok(())
    }

    /// Closes the connection. Only the first call has any effect.
    fn terminate(&self, error: Option<TransportError>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.outbound.lock().clear();
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        // a drain task mid-write drops the writer itself when it sees
        // the closed flag
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        self.handshake.lock().fail();

        {
            let mut inbound = self.inbound.lock();
            if let Some(error) = &error {
                match self.encode(&Message::Error(error.to_string())) {
                    Ok(packet) => inbound.push_back(packet),
                    Err(e) => warn!(id = %self.id, error = %e, "failed to queue error packet"),
                }
            }
            match self.encode(&Message::Disconnect) {
                Ok(packet) => inbound.push_back(packet),
                Err(e) => warn!(id = %self.id, error = %e, "failed to queue disconnect packet"),
            }
        }
        self.finished.store(true, Ordering::Release);

        match &error {
            Some(e) => info!(id = %self.id, remote = %self.remote, error = %e, "connection closed"),
            None => info!(id = %self.id, remote = %self.remote, "connection closed"),
        }
        *self.error.lock() = error;
        self.stage.send_replace(ConnectionStage::NotConnected);
        self.inbound_ready.notify_waiters();
    }
}

async fn drain_outbound(shared: Arc<ConnectionShared>) {
    loop {
        let Some(packet) = shared.outbound.lock().front().cloned() else {
            return;
        };

        let result = {
            let mut writer = shared.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => writer.write_all(packet.as_slice()).await,
                None => {
                    shared.outbound.lock().clear();
                    return;
                }
            }
        };
        drop(packet);

        if let Err(e) = result {
            shared.terminate(Some(TransportError::SendFailed(e)));
            return;
        }
        if shared.closed.load(Ordering::Acquire) {
            shared.writer.lock().await.take();
            return;
        }

        let more = {
            let mut outbound = shared.outbound.lock();
            outbound.pop_front();
            !outbound.is_empty()
        };
        if !more {
            return;
        }
    }
}

async fn read_loop(shared: Arc<ConnectionShared>, mut reader: OwnedReadHalf) {
    let mut decoder = FrameDecoder::new(shared.pool.clone(), shared.config.max_packet_size);
    let mut chunk = vec![0u8; shared.config.read_chunk_size];
    let mut packets = Vec::new();

    let error = 'read: loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(TransportError::ReceiveFailed(e)),
        };
        *shared.last_activity.lock() = Instant::now();

        let status = match decoder.push(&chunk[..n], &mut packets) {
            Ok(status) => status,
            Err(e) => break Some(e),
        };
        for packet in packets.drain(..) {
            if let Err(e) = shared.handle_packet(packet).await {
                break 'read Some(e);
            }
        }
        if status == FrameStatus::Closed {
            break None;
        }
    };

    if decoder.pending_bytes() > 0 {
        debug!(id = %shared.id, bytes = decoder.pending_bytes(), "dropping partial packet");
    }
    decoder.clear();
    shared.terminate(error);
}

// ---------------------------------------------------------------------------
// TcpConnection
// ---------------------------------------------------------------------------

/// One TCP connection carrying length-prefixed packets.
///
/// Dropping the handle closes the connection.
pub struct TcpConnection {
    shared: Arc<ConnectionShared>,
}

impl TcpConnection {
    /// Connects to `addr` and runs the client side of the handshake.
    ///
    /// Returns once the server has accepted our protocol version. The
    /// connect itself is bounded by `connect_timeout` and the handshake
    /// by `verify_timeout`.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: TransportConfig,
        pool: BufferPool,
        name: &str,
    ) -> Result<Self, TransportError> {
        let mut handshake = Handshake::client(config.protocol_version);
        handshake.start_connect();

        let stream = match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::ConnectFailed(e)),
            Err(_) => return Err(TransportError::Timeout("connecting")),
        };
        let remote = stream.peer_addr().map_err(TransportError::ConnectFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%remote, error = %e, "could not disable Nagle");
        }

        let hello = handshake.connected(name, None);
        let verify_timeout = config.verify_timeout;
        let connection = Self::start(stream, remote, config, pool, handshake);
        debug!(id = %connection.id(), %remote, "connected, verifying");
        connection.send_message(&hello)?;

        let mut stages = connection.shared.stage.subscribe();
        let outcome = timeout(
            verify_timeout,
            stages.wait_for(|stage| *stage != ConnectionStage::Verifying),
        )
        .await
        .map(|changed| changed.map(|stage| *stage));

        match outcome {
            Ok(Ok(ConnectionStage::Connected)) => Ok(connection),
            Ok(_) => Err(connection
                .shared
                .error
                .lock()
                .take()
                .unwrap_or(TransportError::NotConnected)),
            Err(_) => {
                connection
                    .shared
                    .terminate(Some(TransportError::Timeout("verifying")));
                Err(TransportError::Timeout("verifying"))
            }
        }
    }

    fn start(
        stream: TcpStream,
        remote: SocketAddr,
        config: TransportConfig,
        pool: BufferPool,
        handshake: Handshake,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let (stage, _) = watch::channel(handshake.stage());

        let shared = Arc::new(ConnectionShared {
            id,
            remote,
            config,
            pool,
            codec: ObjectCodec::default(),
            stage,
            handshake: Mutex::new(handshake),
            player_id: Mutex::new(None),
            inbound: Mutex::new(VecDeque::new()),
            inbound_ready: Notify::new(),
            outbound: Mutex::new(VecDeque::new()),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            error: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&shared), read_half));
        *shared.reader.lock() = Some(reader);
        Self { shared }
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    pub fn stage(&self) -> ConnectionStage {
        self.shared.current_stage()
    }

    /// The player id assigned during the handshake.
    pub fn player_id(&self) -> Option<PlayerId> {
        *self.shared.player_id.lock()
    }

    /// On the server side, the name the client asked for.
    pub fn peer_name(&self) -> Option<String> {
        self.shared.handshake.lock().peer_name().map(str::to_owned)
    }

    /// The codec used for handshake packets. Consumers decoding inbound
    /// packets should use the same one.
    pub fn codec(&self) -> &ObjectCodec {
        &self.shared.codec
    }

    pub fn pool(&self) -> &BufferPool {
        &self.shared.pool
    }

    /// Queues a finished packet. Fails once the connection is closed.
    pub fn send_packet(&self, packet: Shared<Buffer>) -> Result<(), TransportError> {
        self.shared.send_packet(packet)
    }

    /// Encodes `message` into a pooled buffer and queues it.
    pub fn send_message(&self, message: &Message) -> Result<(), TransportError> {
        self.shared.send_message(message)
    }

    /// Takes the oldest inbound packet without waiting.
    pub fn receive_packet(&self) -> Option<Pooled<Buffer>> {
        self.shared.inbound.lock().pop_front()
    }

    /// Waits for the next inbound packet.
    ///
    /// Returns `None` once the connection is closed and its final
    /// `Disconnect` packet has been taken.
    pub async fn next_packet(&self) -> Option<Pooled<Buffer>> {
        loop {
            let notified = self.shared.inbound_ready.notified();
            let finished = self.shared.finished.load(Ordering::Acquire);
            if let Some(packet) = self.receive_packet() {
                return Some(packet);
            }
            if finished {
                return None;
            }
            notified.await;
        }
    }

    /// Waits for the next inbound packet and decodes it.
    pub async fn next_message(&self) -> Option<Result<Message, TransportError>> {
        let mut packet = self.next_packet().await?;
        Some(Message::decode(&self.shared.codec, &mut packet).map_err(TransportError::from))
    }

    /// Closes the connection, abandoning queued sends.
    pub fn disconnect(&self) {
        self.shared.terminate(None);
    }

    /// Time of the last byte received.
    pub fn last_activity(&self) -> Instant {
        *self.shared.last_activity.lock()
    }

    /// Returns `true` if nothing has arrived for at least `timeout`.
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity()) >= timeout
    }

    /// Number of packets waiting to be written.
    pub fn queued_sends(&self) -> usize {
        self.shared.outbound.lock().len()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.shared.terminate(None);
    }
}

impl std::fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.shared.id)
            .field("remote", &self.shared.remote)
            .field("stage", &self.stage())
            .finish()
    }
}

impl Connection for TcpConnection {
    type Error = TransportError;

    async fn send(&self, packet: Shared<Buffer>) -> Result<(), Self::Error> {
        self.send_packet(packet)
    }

    async fn recv(&self) -> Result<Option<Pooled<Buffer>>, Self::Error> {
        Ok(self.next_packet().await)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.disconnect();
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.shared.id
    }
}

// ---------------------------------------------------------------------------
// TcpTransport
// ---------------------------------------------------------------------------

/// A listening socket that yields server-side [`TcpConnection`]s.
///
/// Accepted connections start in `Verifying` and become `Connected` once
/// the client's bootstrap packet carries a matching protocol version.
pub struct TcpTransport {
    listener: TcpListener,
    config: TransportConfig,
    pool: BufferPool,
    next_player: u32,
    shutdown: AtomicBool,
}

impl TcpTransport {
    /// Binds a new TCP transport to the given address.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: TransportConfig,
        pool: BufferPool,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        let local = listener.local_addr().map_err(TransportError::AcceptFailed)?;
        info!(%local, version = config.protocol_version, "TCP transport listening");
        Ok(Self {
            listener,
            config,
            pool,
            next_player: 1,
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::AcceptFailed)
    }
}

impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let (stream, remote) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%remote, error = %e, "could not disable Nagle");
        }

        let player_id = PlayerId(self.next_player);
        self.next_player = self.next_player.wrapping_add(1).max(1);
        let handshake = Handshake::server(self.config.protocol_version, player_id);
        let connection =
            TcpConnection::start(stream, remote, self.config.clone(), self.pool.clone(), handshake);
        debug!(id = %connection.id(), %remote, %player_id, "accepted TCP connection");

        let watched = Arc::downgrade(&connection.shared);
        let verify_timeout = self.config.verify_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(verify_timeout).await;
            if let Some(shared) = watched.upgrade() {
                if shared.current_stage() == ConnectionStage::Verifying {
                    warn!(id = %shared.id, "client did not verify in time");
                    shared.terminate(Some(TransportError::Timeout("verifying")));
                }
            }
        });

        Ok(connection)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        self.shutdown.store(true, Ordering::Release);
        info!("TCP transport shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tether_buffer::{PoolConfig, buffer_pool};

    use super::*;

    async fn pair(config: TransportConfig) -> (TcpConnection, TcpConnection) {
        let pool = buffer_pool(PoolConfig::default());
        let mut transport = TcpTransport::bind("127.0.0.1:0", config.clone(), pool.clone())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();
        let server = tokio::spawn(async move { transport.accept().await.unwrap() });
        let client = TcpConnection::connect(addr, config, pool, "alice")
            .await
            .unwrap();
        (client, server.await.unwrap())
    }

    #[tokio::test]
    async fn test_handshake_assigns_first_player_id() {
        let (client, server) = pair(TransportConfig::default()).await;

        assert_eq!(client.stage(), ConnectionStage::Connected);
        assert_eq!(client.player_id(), Some(PlayerId(1)));
        // the server flips to Connected while handling RequestId, which
        // happens before the client sees the reply
        assert_eq!(server.stage(), ConnectionStage::Connected);
        assert_eq!(server.peer_name().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_disconnect_is_reported_once_locally() {
        let (client, _server) = pair(TransportConfig::default()).await;

        client.disconnect();
        client.disconnect();

        let message = client.next_message().await.unwrap().unwrap();
        assert_eq!(message, Message::Disconnect);
        assert!(client.next_packet().await.is_none());
        assert_eq!(client.stage(), ConnectionStage::NotConnected);
        assert!(matches!(
            client.send_message(&Message::RequestPing),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_send_after_close_leaves_nothing_queued() {
        let (client, _server) = pair(TransportConfig::default()).await;
        let pool = client.pool().clone();

        client.disconnect();
        let packet = pool.acquire().share();
        assert!(matches!(
            client.send_packet(packet),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(client.queued_sends(), 0);
    }

    #[tokio::test]
    async fn test_drain_without_writer_releases_queued_packets() {
        let (client, _server) = pair(TransportConfig::default()).await;
        let shared = Arc::clone(&client.shared);
        shared.writer.lock().await.take();

        let packet = client.pool().acquire().share();
        shared.outbound.lock().push_back(packet);
        drain_outbound(Arc::clone(&shared)).await;

        assert_eq!(client.queued_sends(), 0);
    }

    #[tokio::test]
    async fn test_is_timed_out_compares_last_activity() {
        let (client, _server) = pair(TransportConfig::default()).await;
        let now = client.last_activity();
        assert!(!client.is_timed_out(now, Duration::from_secs(1)));
        assert!(client.is_timed_out(now + Duration::from_secs(2), Duration::from_secs(1)));
    }
}
