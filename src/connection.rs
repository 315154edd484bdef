//! Per-device TCP connection management.
//!
//! A [`DeviceConnection`] binds to one logical device and operates in one
//! of two roles: Client (a single outbound socket) or Server (a listener
//! plus a set of accepted client sockets). Every socket gets its own read
//! loop; a Server additionally runs an accept loop. All loops observe the
//! device's cancellation token and exit within one blocking cycle of
//! [`DeviceConnection::disconnect`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::HsmsCodec;
use crate::error::{LinkError, Result};
use crate::types::{Message, Role};

/// Default send timeout in milliseconds.
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;

/// Default number of send retries after the first attempt.
pub const DEFAULT_SEND_RETRIES: u32 = 2;

/// Base backoff between send attempts; attempt `n` waits `n *` this.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

type FrameSink = SplitSink<Framed<TcpStream, HsmsCodec>, Message>;
type FrameStream = SplitStream<Framed<TcpStream, HsmsCodec>>;

/// Per-connection outcome of one send operation.
///
/// Client mode carries a single entry; Server mode carries one entry per
/// accepted client, so callers can record which clients missed a
/// broadcast independently of the aggregate outcome.
#[derive(Debug, Clone, Default)]
pub struct SendReport {
    /// Per-connection outcomes: (connection id, delivered)
    pub deliveries: Vec<(String, bool)>,
}

impl SendReport {
    /// Whether at least one connection accepted the write.
    pub fn delivered(&self) -> bool {
        self.deliveries.iter().any(|(_, ok)| *ok)
    }

    /// Connection ids whose write failed after exhausting retries.
    pub fn failures(&self) -> impl Iterator<Item = &str> {
        self.deliveries
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(conn_id, _)| conn_id.as_str())
    }
}

/// Internal events a connection reports to its owner.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The device transitioned between connected and disconnected.
    StatusChanged {
        /// Owning device id
        device_id: String,
        /// New state
        is_connected: bool,
    },
    /// A frame arrived and was decoded.
    MessageReceived {
        /// Owning device id
        device_id: String,
        /// The decoded frame
        message: Message,
    },
}

struct ConnState {
    device_id: String,
    role: Role,
    /// Signaled connection state; guards one event per actual transition.
    signaled: AtomicBool,
    /// Listener bound (Server) or socket open (Client).
    active: AtomicBool,
    client_count: AtomicUsize,
    conn_seq: AtomicU64,
    sinks: tokio::sync::Mutex<HashMap<String, FrameSink>>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl ConnState {
    async fn emit_status(&self, is_connected: bool) {
        let _ = self
            .event_tx
            .send(ConnectionEvent::StatusChanged {
                device_id: self.device_id.clone(),
                is_connected,
            })
            .await;
    }

    /// Flip the signaled state; returns true when this call made the transition.
    fn transition(&self, connected: bool) -> bool {
        self.signaled
            .compare_exchange(!connected, connected, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// One TCP connection abstraction per logical device.
///
/// Created on connect and dropped on disconnect/remove; reconnecting a
/// device means building a fresh `DeviceConnection`.
pub struct DeviceConnection {
    inner: Arc<ConnState>,
}

impl DeviceConnection {
    /// Create an idle connection for a device.
    ///
    /// Events are reported on `event_tx`; the registry shares one channel
    /// across all of its connections.
    pub fn new(
        device_id: impl Into<String>,
        role: Role,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Self {
        let device_id = device_id.into();
        Self {
            inner: Arc::new(ConnState {
                device_id,
                role,
                signaled: AtomicBool::new(false),
                active: AtomicBool::new(false),
                client_count: AtomicUsize::new(0),
                conn_seq: AtomicU64::new(0),
                sinks: tokio::sync::Mutex::new(HashMap::new()),
                local_addr: parking_lot::Mutex::new(None),
                event_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Device this connection belongs to.
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    /// Role this connection operates in.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Whether the device currently holds a live connection.
    ///
    /// Client: the socket is open. Server: the accepted-client set is
    /// non-empty.
    pub fn is_connected(&self) -> bool {
        match self.inner.role {
            Role::Client => self.inner.active.load(Ordering::SeqCst),
            Role::Server => self.inner.client_count.load(Ordering::SeqCst) > 0,
        }
    }

    /// Whether the endpoint is up: socket open (Client) or listener bound
    /// (Server), regardless of accepted clients.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Number of accepted remote clients (Server role; 0 or 1 for Client).
    pub fn client_count(&self) -> usize {
        match self.inner.role {
            Role::Client => usize::from(self.is_connected()),
            Role::Server => self.inner.client_count.load(Ordering::SeqCst),
        }
    }

    /// Bound listener address, once a Server-role connect succeeded.
    ///
    /// Lets callers bind port 0 and discover the ephemeral port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Open the endpoint.
    ///
    /// Client role dials `host:port` bounded by `connect_timeout`. Server
    /// role binds a listener and returns as soon as the bind succeeds;
    /// clients may arrive later. Both raise a status-changed(true) event on
    /// success. Socket errors are logged and returned.
    pub async fn connect(&self, host: &str, port: u16, connect_timeout: Duration) -> Result<()> {
        match self.inner.role {
            Role::Client => self.connect_client(host, port, connect_timeout).await,
            Role::Server => self.listen(host, port).await,
        }
    }

    async fn connect_client(&self, host: &str, port: u16, connect_timeout: Duration) -> Result<()> {
        let addr = format!("{host}:{port}");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                warn!(device_id = %self.inner.device_id, %addr, "connect timed out");
                LinkError::ConnectionTimeout
            })?
            .map_err(|e| {
                warn!(device_id = %self.inner.device_id, %addr, error = %e, "connect failed");
                LinkError::Io(e)
            })?;

        stream.set_nodelay(true).ok();

        // The peer of an outbound client acts as the server.
        let codec = HsmsCodec::new(self.inner.device_id.clone(), Role::Server);
        let (sink, frames) = Framed::new(stream, codec).split();

        let conn_id = self.inner.device_id.clone();
        self.inner.sinks.lock().await.insert(conn_id.clone(), sink);
        self.inner.active.store(true, Ordering::SeqCst);

        if self.inner.transition(true) {
            self.inner.emit_status(true).await;
        }
        spawn_read_loop(Arc::clone(&self.inner), conn_id, frames);
        info!(device_id = %self.inner.device_id, %addr, "client connected");
        Ok(())
    }

    async fn listen(&self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            warn!(device_id = %self.inner.device_id, %addr, error = %e, "bind failed");
            LinkError::Io(e)
        })?;

        let local = listener.local_addr().map_err(LinkError::Io)?;
        *self.inner.local_addr.lock() = Some(local);
        self.inner.active.store(true, Ordering::SeqCst);
        spawn_accept_loop(Arc::clone(&self.inner), listener);

        // The listener is up before any client arrives.
        if self.inner.transition(true) {
            self.inner.emit_status(true).await;
        }
        info!(device_id = %self.inner.device_id, %local, "listening");
        Ok(())
    }

    /// Close the endpoint.
    ///
    /// Cancels all read/accept loops, closes every socket, clears the
    /// client set and raises status-changed(false) exactly once. A second
    /// call is a no-op.
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();
        self.inner.active.store(false, Ordering::SeqCst);

        let mut sinks = self.inner.sinks.lock().await;
        for (conn_id, mut sink) in sinks.drain() {
            if let Err(e) = sink.close().await {
                debug!(device_id = %self.inner.device_id, %conn_id, error = %e, "close failed");
            }
        }
        drop(sinks);
        self.inner.client_count.store(0, Ordering::SeqCst);

        if self.inner.transition(false) {
            self.inner.emit_status(false).await;
            info!(device_id = %self.inner.device_id, "disconnected");
        }
    }

    /// Send a message on this connection.
    ///
    /// Client mode writes to the single socket; Server mode broadcasts to
    /// every accepted client. Each write attempt races `timeout_ms` and is
    /// retried up to `retry_count` times with linear backoff. The returned
    /// report carries one outcome per connection so callers can record
    /// failed clients; the broadcast as a whole is considered delivered
    /// when at least one write lands.
    pub async fn send(&self, message: &Message, timeout_ms: u64, retry_count: u32) -> SendReport {
        let mut sinks = self.inner.sinks.lock().await;
        if sinks.is_empty() {
            warn!(device_id = %self.inner.device_id, "send with no live connection");
            return SendReport::default();
        }

        let send_timeout = Duration::from_millis(timeout_ms);
        let mut report = SendReport::default();

        for (conn_id, sink) in sinks.iter_mut() {
            let ok = send_with_retry(sink, message, send_timeout, retry_count).await;
            if !ok {
                warn!(
                    device_id = %self.inner.device_id,
                    %conn_id,
                    retries = retry_count,
                    "send failed after retries"
                );
            }
            report.deliveries.push((conn_id.clone(), ok));
        }

        debug!(
            device_id = %self.inner.device_id,
            delivered = report.delivered(),
            total = report.deliveries.len(),
            sf = %message.sf_code(),
            "send complete"
        );
        report
    }
}

async fn send_with_retry(
    sink: &mut FrameSink,
    message: &Message,
    send_timeout: Duration,
    retry_count: u32,
) -> bool {
    for attempt in 0..=retry_count {
        if attempt > 0 {
            sleep(RETRY_BACKOFF * attempt).await;
        }
        match timeout(send_timeout, sink.send(message.clone())).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => {
                debug!(attempt, error = %e, "write attempt failed");
            }
            Err(_) => {
                debug!(attempt, timeout_ms = send_timeout.as_millis() as u64, "write attempt timed out");
            }
        }
    }
    false
}

fn spawn_accept_loop(state: Arc<ConnState>, listener: TcpListener) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = state.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        stream.set_nodelay(true).ok();
                        let seq = state.conn_seq.fetch_add(1, Ordering::SeqCst);
                        let conn_id = format!("{peer}#{seq}");
                        let codec = HsmsCodec::new(conn_id.clone(), Role::Client);
                        let (sink, frames) = Framed::new(stream, codec).split();

                        state.sinks.lock().await.insert(conn_id.clone(), sink);
                        state.client_count.fetch_add(1, Ordering::SeqCst);
                        info!(device_id = %state.device_id, %conn_id, "client accepted");

                        if state.transition(true) {
                            state.emit_status(true).await;
                        }
                        spawn_read_loop(Arc::clone(&state), conn_id, frames);
                    }
                    Err(e) => {
                        warn!(device_id = %state.device_id, error = %e, "accept failed");
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
        debug!(device_id = %state.device_id, "accept loop stopped");
    });
}

fn spawn_read_loop(state: Arc<ConnState>, conn_id: String, mut frames: FrameStream) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = state.cancel.cancelled() => break,
                frame = frames.next() => match frame {
                    Some(Ok(message)) => {
                        let _ = state
                            .event_tx
                            .send(ConnectionEvent::MessageReceived {
                                device_id: state.device_id.clone(),
                                message,
                            })
                            .await;
                    }
                    Some(Err(e)) => {
                        if matches!(e, LinkError::Io(_)) {
                            warn!(device_id = %state.device_id, %conn_id, error = %e, "read failed");
                            handle_peer_closed(&state, &conn_id).await;
                            break;
                        }
                        // Malformed input is logged; the loop keeps reading.
                        warn!(device_id = %state.device_id, %conn_id, error = %e, "decode failed");
                    }
                    None => {
                        handle_peer_closed(&state, &conn_id).await;
                        break;
                    }
                }
            }
        }
        debug!(device_id = %state.device_id, %conn_id, "read loop stopped");
    });
}

/// Zero-byte read: the peer closed. Server mode removes the one client;
/// Client mode tears the whole connection down.
async fn handle_peer_closed(state: &Arc<ConnState>, conn_id: &str) {
    info!(device_id = %state.device_id, %conn_id, "peer closed");

    if let Some(mut sink) = state.sinks.lock().await.remove(conn_id) {
        let _ = sink.close().await;
    }

    let remaining = match state.role {
        Role::Client => {
            state.active.store(false, Ordering::SeqCst);
            0
        }
        Role::Server => {
            let before = state.client_count.load(Ordering::SeqCst);
            if before > 0 {
                state.client_count.fetch_sub(1, Ordering::SeqCst);
            }
            before.saturating_sub(1)
        }
    };

    if remaining == 0 && state.transition(false) {
        state.emit_status(false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use tokio::io::AsyncWriteExt;

    fn test_channel() -> (mpsc::Sender<ConnectionEvent>, mpsc::Receiver<ConnectionEvent>) {
        mpsc::channel(64)
    }

    async fn recv_status(rx: &mut mpsc::Receiver<ConnectionEvent>) -> Option<bool> {
        loop {
            match timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(ConnectionEvent::StatusChanged { is_connected, .. })) => {
                    return Some(is_connected)
                }
                Ok(Some(_)) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_server_bind_signals_connected() {
        let (tx, mut rx) = test_channel();
        let conn = DeviceConnection::new("EQP1", Role::Server, tx);

        conn.connect("127.0.0.1", 0, Duration::from_secs(1)).await.unwrap();
        assert!(conn.local_addr().is_some());
        assert!(conn.is_active());
        assert!(!conn.is_connected());

        assert_eq!(recv_status(&mut rx).await, Some(true));
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_client_connect_refused() {
        let (tx, _rx) = test_channel();
        // Bind then drop to obtain a port nothing listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let conn = DeviceConnection::new("EQP2", Role::Client, tx);
        let result = conn.connect("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(result.is_err());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_server_receives_frame() {
        let (tx, mut rx) = test_channel();
        let conn = DeviceConnection::new("EQP1", Role::Server, tx);
        conn.connect("127.0.0.1", 0, Duration::from_secs(1)).await.unwrap();
        let addr = conn.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let frame = encode_frame(&Message::outgoing(6, 11, "EVENT_REPORT_SEND", true, "host", Role::Client));
        client.write_all(&frame).await.unwrap();

        let message = loop {
            match timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap() {
                ConnectionEvent::MessageReceived { message, .. } => break message,
                ConnectionEvent::StatusChanged { .. } => continue,
            }
        };
        assert_eq!(message.sf_code(), "S6F11");
        assert_eq!(message.message_type, "Event Report");
        assert_eq!(message.content, "EVENT_REPORT_SEND");

        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_broadcast_partial_failure() {
        let (tx, mut rx) = test_channel();
        let conn = DeviceConnection::new("EQP1", Role::Server, tx);
        conn.connect("127.0.0.1", 0, Duration::from_secs(1)).await.unwrap();
        let addr = conn.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();
        let c3 = TcpStream::connect(addr).await.unwrap();

        // Let the accept loop register all three.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(conn.client_count(), 3);

        // Reset-close one socket. No await between the drop and the sends,
        // so the read loop cannot reap the dead client first.
        c3.set_linger(Some(Duration::ZERO)).unwrap();
        drop(c3);

        let msg = Message::outgoing(6, 11, "BROADCAST", false, "EQP1", Role::Server);
        let first = conn.send(&msg, 1000, 0).await;
        let second = conn.send(&msg, 1000, 0).await;

        // At least one client accepted each write.
        assert!(first.delivered());
        assert!(second.delivered());
        // The reset client surfaces as a per-connection failure; the very
        // first write may still land in the local buffer, the next cannot.
        assert!(first.failures().count() + second.failures().count() >= 1);

        // Drain events so the channel does not back up.
        while rx.try_recv().is_ok() {}
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let (tx, _rx) = test_channel();
        let conn = DeviceConnection::new("EQP1", Role::Client, tx);
        let msg = Message::outgoing(1, 13, "PING", true, "EQP1", Role::Client);
        let report = conn.send(&msg, 100, 0).await;
        assert!(!report.delivered());
        assert!(report.deliveries.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_idempotent() {
        let (tx, mut rx) = test_channel();
        let conn = DeviceConnection::new("EQP1", Role::Server, tx);
        conn.connect("127.0.0.1", 0, Duration::from_secs(1)).await.unwrap();
        assert_eq!(recv_status(&mut rx).await, Some(true));

        conn.disconnect().await;
        conn.disconnect().await;

        assert_eq!(recv_status(&mut rx).await, Some(false));
        // No second disconnected event.
        assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_client_detects_peer_close() {
        let (tx, mut rx) = test_channel();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let conn = DeviceConnection::new("EQP1", Role::Client, tx);
        conn.connect(&addr.ip().to_string(), addr.port(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(recv_status(&mut rx).await, Some(true));

        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        assert_eq!(recv_status(&mut rx).await, Some(false));
        assert!(!conn.is_connected());
    }
}
