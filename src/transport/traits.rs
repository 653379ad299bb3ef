// Transport Traits and Core Types
// Defines the abstract Transport trait and the types shared by every implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

// ============================================================================
// PEER ID
// ============================================================================

/// Addressable identity of a store instance on the mesh
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create from any string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random peer id
    pub fn generate() -> Self {
        Self(crate::document::generate_id())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// TRANSPORT STATE
// ============================================================================

/// State of the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Running,
    ShutDown,
}

impl TransportState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: &TransportState) -> bool {
        matches!(
            (self, target),
            (Self::Stopped, Self::Running)
                | (Self::Running, Self::ShutDown)
                | (Self::Stopped, Self::ShutDown)
        )
    }

    /// Check if the transport is running
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Events emitted by the transport layer.
///
/// Events about one peer arrive in the order the transport produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A remote peer opened a connection to us
    Incoming { peer: PeerId },

    /// The channel to `peer` is ready for data
    Open { peer: PeerId },

    /// A frame arrived from `peer`
    Data { peer: PeerId, payload: String },

    /// The channel to `peer` closed
    Closed { peer: PeerId, reason: String },

    /// Something failed, optionally tied to one peer
    Error {
        peer: Option<PeerId>,
        error: TransportError,
    },
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Peer id already in use: {0}")]
    PeerIdTaken(PeerId),

    #[error("Not connected to {0}")]
    NotConnected(PeerId),

    #[error("Transport not running")]
    NotRunning,

    #[error("Transport already running")]
    AlreadyRunning,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

// ============================================================================
// TRANSPORT STATISTICS
// ============================================================================

/// Statistics for transport operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportStats {
    /// Connections established in either direction
    pub connections_total: u64,
    /// Frames handed to the wire
    pub messages_sent: u64,
    /// Frames delivered as events
    pub messages_received: u64,
    /// Bytes handed to the wire
    pub bytes_sent: u64,
    /// Errors encountered
    pub errors: u64,
}

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// A channel provider: peer identity, connection setup and frame delivery.
///
/// `send` only enqueues; it never waits for the peer.
#[async_trait]
pub trait Transport: Send {
    /// Start under the given local identity
    async fn start(&mut self, local: PeerId) -> Result<(), TransportError>;

    /// Request a connection; `Open` follows as an event once it is ready
    async fn connect(&mut self, remote: &PeerId) -> Result<(), TransportError>;

    /// Queue a frame for `remote`
    fn send(&mut self, remote: &PeerId, payload: &str) -> Result<(), TransportError>;

    /// Wait for the next event; `None` once the transport has shut down
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Release the local identity and stop all channels
    async fn shutdown(&mut self);

    /// The local identity, once started
    fn local_peer_id(&self) -> Option<&PeerId>;

    /// Address remote peers can dial, for transports that listen
    fn listen_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Get the current transport state
    fn state(&self) -> &TransportState;

    /// Get transport statistics
    fn stats(&self) -> TransportStats;
}
