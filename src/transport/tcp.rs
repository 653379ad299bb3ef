// TCP Transport Implementation
// Newline-delimited frames over TCP; the dialer's first frame is its peer id.

use crate::transport::{
    PeerId, Transport, TransportError, TransportEvent, TransportState, TransportStats,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

// ============================================================================
// TCP TRANSPORT CONFIG
// ============================================================================

/// Configuration for TCP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpTransportConfig {
    /// Address to bind to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub bind_port: u16,
    /// Connect and handshake timeout in seconds
    pub connection_timeout_secs: u64,
    /// Largest accepted frame, excluding the newline
    pub max_frame_bytes: usize,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 0,
            connection_timeout_secs: 10,
            max_frame_bytes: 4 * 1024 * 1024,
            nodelay: true,
        }
    }
}

impl TcpTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn with_connection_timeout(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_frame_bytes == 0 {
            return Err(TransportError::InvalidConfig(
                "max_frame_bytes cannot be 0".to_string(),
            ));
        }
        if self.connection_timeout_secs == 0 {
            return Err(TransportError::InvalidConfig(
                "connection_timeout_secs cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SHARED CONNECTION STATE
// ============================================================================

/// The stream frames to a peer are currently written to
struct Link {
    /// Unique per stream within this transport
    stream_id: u64,
    /// Which side opened the stream
    dialer: PeerId,
    writer: mpsc::UnboundedSender<String>,
}

/// Links and tasks shared between the transport and its spawned tasks
#[derive(Clone, Default)]
struct Shared {
    links: Arc<Mutex<HashMap<PeerId, Link>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    next_stream_id: Arc<AtomicU64>,
}

impl Shared {
    fn links(&self) -> MutexGuard<'_, HashMap<PeerId, Link>> {
        self.links.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    fn abort_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        self.links().clear();
    }

    /// Make `link` the stream for `peer`, unless the current one wins.
    ///
    /// A newer stream from the same dialer replaces the old one. When both
    /// sides dialed, the stream opened by the smaller peer id is kept, so
    /// both ends settle on the same stream.
    fn install(&self, local: &PeerId, peer: &PeerId, link: Link) -> bool {
        let mut links = self.links();
        if let Some(current) = links.get(peer) {
            let preferred = local.min(peer);
            if !current.writer.is_closed()
                && current.dialer != link.dialer
                && &current.dialer == preferred
            {
                return false;
            }
        }
        links.insert(peer.clone(), link);
        true
    }

    /// Forget `peer`'s link if it is still `stream_id`
    fn release(&self, peer: &PeerId, stream_id: u64) -> bool {
        let mut links = self.links();
        match links.get(peer) {
            Some(link) if link.stream_id == stream_id => {
                links.remove(peer);
                true
            }
            _ => false,
        }
    }
}

/// An identified stream, ready to be installed
struct Stream {
    peer: PeerId,
    dialer: PeerId,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Install a stream and spawn its reader and writer tasks.
///
/// Emits `Incoming` (for accepted streams) and `Open`, then starts reading.
/// Returns `false` if the stream lost to an existing one and was dropped.
/// Only a stream that is still current when it ends reports `Error`/`Closed`.
fn spawn_connection(
    shared: &Shared,
    local: &PeerId,
    stream: Stream,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    max_frame_bytes: usize,
) -> bool {
    let Stream {
        peer,
        dialer,
        reader,
        mut writer,
    } = stream;
    let dialer_is_remote = dialer == peer;
    let stream_id = shared.next_stream_id.fetch_add(1, Ordering::Relaxed);
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<String>();

    let link = Link {
        stream_id,
        dialer,
        writer: write_tx,
    };
    if !shared.install(local, &peer, link) {
        debug!(peer = %peer, stream_id, "Dropping duplicate stream");
        return false;
    }

    // Announce before the reader can deliver anything
    if dialer_is_remote {
        let _ = event_tx.send(TransportEvent::Incoming { peer: peer.clone() });
    }
    let _ = event_tx.send(TransportEvent::Open { peer: peer.clone() });

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = write_rx.recv().await {
            if writer.write_all(frame.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
            {
                break;
            }
        }
    });

    let reader_shared = shared.clone();
    let reader_task = tokio::spawn(async move {
        let ended = read_frames(&peer, reader, &event_tx, max_frame_bytes).await;
        if !reader_shared.release(&peer, stream_id) {
            debug!(peer = %peer, stream_id, "Superseded stream ended");
            return;
        }
        let reason = match ended {
            Ok(reason) => reason,
            Err(error) => {
                let reason = error.to_string();
                let _ = event_tx.send(TransportEvent::Error {
                    peer: Some(peer.clone()),
                    error,
                });
                reason
            }
        };
        let _ = event_tx.send(TransportEvent::Closed { peer, reason });
    });

    shared.track(writer_task);
    shared.track(reader_task);
    true
}

/// Read frames until the stream ends; returns why it ended
async fn read_frames(
    peer: &PeerId,
    mut reader: BufReader<OwnedReadHalf>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
    max_frame_bytes: usize,
) -> Result<String, TransportError> {
    loop {
        match read_frame(&mut reader, max_frame_bytes).await? {
            Some(payload) => {
                let event = TransportEvent::Data {
                    peer: peer.clone(),
                    payload,
                };
                if event_tx.send(event).is_err() {
                    return Ok("Transport dropped".to_string());
                }
            }
            None => return Ok("Connection closed".to_string()),
        }
    }
}

/// Read the dialer's hello on an accepted stream and install it
async fn accept_stream(
    shared: Shared,
    local: PeerId,
    stream: TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    handshake_timeout: Duration,
    max_frame_bytes: usize,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let hello = timeout(handshake_timeout, read_frame(&mut reader, max_frame_bytes)).await;

    let peer = match hello {
        Ok(Ok(Some(id))) if !id.is_empty() && id != local.as_str() => PeerId::new(id),
        _ => {
            warn!(%addr, "Dropping connection without a valid hello");
            return;
        }
    };

    debug!(peer = %peer, %addr, "Accepted connection");
    let stream = Stream {
        dialer: peer.clone(),
        peer,
        reader,
        writer: write_half,
    };
    spawn_connection(&shared, &local, stream, event_tx, max_frame_bytes);
}

/// Read one newline-terminated frame; `None` on clean end of stream
async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    max_frame_bytes: usize,
) -> Result<Option<String>, TransportError> {
    let mut line = String::new();
    // One extra byte for the newline, one more to detect oversize frames
    let limit = max_frame_bytes as u64 + 2;
    let n = (&mut *reader).take(limit).read_line(&mut line).await?;

    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        if line.len() > max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                size: line.len(),
                max: max_frame_bytes,
            });
        }
        // Stream ended mid-frame
        return Ok(None);
    }

    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    if line.len() > max_frame_bytes {
        return Err(TransportError::FrameTooLarge {
            size: line.len(),
            max: max_frame_bytes,
        });
    }
    Ok(Some(line))
}

// ============================================================================
// TCP TRANSPORT
// ============================================================================

/// TCP transport implementation
pub struct TcpTransport {
    config: TcpTransportConfig,
    state: TransportState,
    local: Option<PeerId>,
    local_addr: Option<SocketAddr>,
    /// Where to dial known peers
    address_book: HashMap<PeerId, SocketAddr>,
    shared: Shared,
    event_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    event_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    listener_handle: Option<JoinHandle<()>>,
    stats: TransportStats,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            state: TransportState::Stopped,
            local: None,
            local_addr: None,
            address_book: HashMap::new(),
            shared: Shared::default(),
            event_tx: None,
            event_rx: None,
            listener_handle: None,
            stats: TransportStats::default(),
        }
    }

    /// Record where `peer` can be dialed
    pub fn add_address(&mut self, peer: PeerId, addr: SocketAddr) {
        self.address_book.insert(peer, addr);
    }

    /// The bound listener address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn running(&self) -> Result<(&PeerId, &mpsc::UnboundedSender<TransportEvent>), TransportError> {
        match (&self.state, &self.local, &self.event_tx) {
            (TransportState::Running, Some(local), Some(tx)) => Ok((local, tx)),
            _ => Err(TransportError::NotRunning),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&mut self, local: PeerId) -> Result<(), TransportError> {
        if self.state.is_running() {
            return Err(TransportError::AlreadyRunning);
        }
        if !self.state.can_transition_to(&TransportState::Running) {
            return Err(TransportError::InvalidOperation(
                "Transport was shut down".to_string(),
            ));
        }
        self.config.validate()?;

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.bind_port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let local_addr = listener.local_addr()?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // Accept loop: each stream gets its own handshake task
        let shared = self.shared.clone();
        let accept_tx = event_tx.clone();
        let accept_local = local.clone();
        let handshake_timeout = Duration::from_secs(self.config.connection_timeout_secs);
        let max_frame_bytes = self.config.max_frame_bytes;
        let nodelay = self.config.nodelay;
        let handle = tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                stream.set_nodelay(nodelay).ok();

                let handshake = accept_stream(
                    shared.clone(),
                    accept_local.clone(),
                    stream,
                    addr,
                    accept_tx.clone(),
                    handshake_timeout,
                    max_frame_bytes,
                );
                shared.track(tokio::spawn(handshake));
            }
        });

        debug!(peer = %local, addr = %local_addr, "TCP transport listening");
        self.listener_handle = Some(handle);
        self.local = Some(local);
        self.local_addr = Some(local_addr);
        self.event_tx = Some(event_tx);
        self.event_rx = Some(event_rx);
        self.state = TransportState::Running;
        Ok(())
    }

    async fn connect(&mut self, remote: &PeerId) -> Result<(), TransportError> {
        let (local, event_tx) = self.running()?;
        let (local, event_tx) = (local.clone(), event_tx.clone());

        if &local == remote {
            return Err(TransportError::InvalidOperation(
                "Cannot connect to self".to_string(),
            ));
        }
        let addr = *self
            .address_book
            .get(remote)
            .ok_or_else(|| TransportError::UnknownPeer(remote.clone()))?;

        let connect_timeout = Duration::from_secs(self.config.connection_timeout_secs);
        let stream = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(TransportError::ConnectionFailed(e.to_string()));
            }
            Err(_) => {
                self.stats.errors += 1;
                return Err(TransportError::Timeout);
            }
        };
        stream.set_nodelay(self.config.nodelay).ok();

        let (read_half, mut write_half) = stream.into_split();
        let hello = format!("{}\n", local);
        write_half.write_all(hello.as_bytes()).await?;

        let stream = Stream {
            peer: remote.clone(),
            dialer: local.clone(),
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        let installed = spawn_connection(
            &self.shared,
            &local,
            stream,
            event_tx.clone(),
            self.config.max_frame_bytes,
        );
        if !installed {
            // The stream the peer dialed to us wins and stays usable
            let _ = event_tx.send(TransportEvent::Open {
                peer: remote.clone(),
            });
        }

        self.stats.connections_total += 1;
        Ok(())
    }

    fn send(&mut self, remote: &PeerId, payload: &str) -> Result<(), TransportError> {
        self.running()?;

        if payload.contains('\n') {
            return Err(TransportError::SendFailed(
                "Payload contains a frame delimiter".to_string(),
            ));
        }
        if payload.len() > self.config.max_frame_bytes {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.config.max_frame_bytes,
            });
        }

        let sent = self
            .shared
            .links()
            .get(remote)
            .map(|link| link.writer.send(payload.to_string()).is_ok());

        match sent {
            Some(true) => {
                self.stats.messages_sent += 1;
                self.stats.bytes_sent += payload.len() as u64;
                Ok(())
            }
            _ => {
                self.stats.errors += 1;
                Err(TransportError::NotConnected(remote.clone()))
            }
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.event_rx.as_mut()?.recv().await?;

        match &event {
            TransportEvent::Data { .. } => self.stats.messages_received += 1,
            TransportEvent::Incoming { .. } => self.stats.connections_total += 1,
            TransportEvent::Error { .. } => self.stats.errors += 1,
            _ => {}
        }
        Some(event)
    }

    async fn shutdown(&mut self) {
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
        }
        self.shared.abort_all();

        self.event_tx = None;
        self.event_rx = None;
        self.local_addr = None;
        if let Some(local) = self.local.take() {
            debug!(peer = %local, "TCP transport shut down");
        }
        self.state = TransportState::ShutDown;
    }

    fn local_peer_id(&self) -> Option<&PeerId> {
        self.local.as_ref()
    }

    fn listen_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn state(&self) -> &TransportState {
        &self.state
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
        }
        self.shared.abort_all();
    }
}
