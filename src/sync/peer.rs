// Connection Registry - Track peer channels and their liveness
//
// Maps remote peer id -> connection state. Dead connections stay visible
// until pruned, but broadcasts only go to open ones.

use crate::transport::PeerId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Peer-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("Cannot add self as a peer")]
    CannotAddSelf,

    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Invalid connection transition for {peer}: {from:?} -> {to:?}")]
    InvalidTransition {
        peer: PeerId,
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// State of a peer connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Requested or announced, channel not ready yet
    Pending,
    /// Channel ready for data
    Open,
    /// Channel closed by either side
    Closed,
    /// Channel failed
    Errored,
}

impl ConnectionState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, target) {
            (Pending, Open) | (Pending, Closed) | (Pending, Errored) => true,
            (Open, Closed) | (Open, Errored) => true,
            // A terminal connection is revived by a new connect or inbound request
            (Closed, Pending) | (Errored, Pending) => true,
            _ => false,
        }
    }

    /// Closed and Errored are terminal
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// Who initiated the connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Statistics about a connection registry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub total_connections: usize,
    pub pending_connections: usize,
    pub open_connections: usize,
    pub closed_connections: usize,
    pub errored_connections: usize,
}

/// One channel to a remote peer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Connection {
    peer_id: PeerId,
    direction: Direction,
    state: ConnectionState,
    /// When the connection was registered (unix timestamp ms)
    created_at: u64,
    messages_sent: u64,
    messages_received: u64,
    last_error: Option<String>,
}

impl Connection {
    /// Create a new pending connection
    pub fn new(peer_id: PeerId, direction: Direction) -> Self {
        Self {
            peer_id,
            direction,
            state: ConnectionState::Pending,
            created_at: Utc::now().timestamp_millis().max(0) as u64,
            messages_sent: 0,
            messages_received: 0,
            last_error: None,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// The most recent failure, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }
}

/// Registry of connections keyed by remote peer id
#[derive(Clone, Debug)]
pub struct ConnectionRegistry {
    /// Our own peer id
    local: PeerId,
    connections: HashMap<PeerId, Connection>,
}

impl ConnectionRegistry {
    /// Create a new registry
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            connections: HashMap::new(),
        }
    }

    pub fn local_peer_id(&self) -> &PeerId {
        &self.local
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections in any state
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if we know a peer
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.connections.contains_key(peer)
    }

    /// Get a connection by peer id
    pub fn get(&self, peer: &PeerId) -> Option<&Connection> {
        self.connections.get(peer)
    }

    /// Register a connection in `Pending`.
    ///
    /// Re-registering a known peer resets its state and keeps its counters.
    pub fn register(
        &mut self,
        peer: PeerId,
        direction: Direction,
    ) -> Result<&Connection, PeerError> {
        if peer == self.local {
            return Err(PeerError::CannotAddSelf);
        }

        let connection = self
            .connections
            .entry(peer.clone())
            .and_modify(|c| {
                c.direction = direction;
                c.state = ConnectionState::Pending;
                c.last_error = None;
            })
            .or_insert_with(|| Connection::new(peer, direction));

        Ok(connection)
    }

    /// Move a connection to `target`, following the transition table.
    ///
    /// Staying in the current state is allowed.
    fn transition(
        &mut self,
        peer: &PeerId,
        target: ConnectionState,
    ) -> Result<&mut Connection, PeerError> {
        let connection = self
            .connections
            .get_mut(peer)
            .ok_or_else(|| PeerError::PeerNotFound(peer.clone()))?;
        if connection.state != target && !connection.state.can_transition_to(target) {
            return Err(PeerError::InvalidTransition {
                peer: peer.clone(),
                from: connection.state,
                to: target,
            });
        }
        connection.state = target;
        Ok(connection)
    }

    /// Mark a connection open; an unseen peer is registered as inbound first.
    ///
    /// A closed or errored connection must be registered again before it
    /// can open.
    pub fn mark_open(&mut self, peer: &PeerId) -> Result<(), PeerError> {
        if !self.contains(peer) {
            self.register(peer.clone(), Direction::Inbound)?;
        }
        self.transition(peer, ConnectionState::Open)?;
        Ok(())
    }

    /// Mark a connection closed; an errored connection keeps its error
    pub fn mark_closed(&mut self, peer: &PeerId) -> Result<(), PeerError> {
        match self.transition(peer, ConnectionState::Closed) {
            Ok(_)
            | Err(PeerError::InvalidTransition {
                from: ConnectionState::Errored,
                ..
            }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Mark a connection failed
    pub fn mark_errored(
        &mut self,
        peer: &PeerId,
        error: impl Into<String>,
    ) -> Result<(), PeerError> {
        let connection = self.transition(peer, ConnectionState::Errored)?;
        connection.last_error = Some(error.into());
        Ok(())
    }

    /// Count a frame sent to `peer`
    pub fn record_sent(&mut self, peer: &PeerId) {
        if let Some(connection) = self.connections.get_mut(peer) {
            connection.messages_sent = connection.messages_sent.saturating_add(1);
        }
    }

    /// Count a frame received from `peer`
    pub fn record_received(&mut self, peer: &PeerId) {
        if let Some(connection) = self.connections.get_mut(peer) {
            connection.messages_received = connection.messages_received.saturating_add(1);
        }
    }

    /// Peer ids of open connections, sorted
    pub fn open_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .connections
            .values()
            .filter(|c| c.is_open())
            .map(|c| c.peer_id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// All connections, sorted by peer id
    pub fn all(&self) -> Vec<&Connection> {
        let mut connections: Vec<&Connection> = self.connections.values().collect();
        connections.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        connections
    }

    /// Get connections by state
    pub fn by_state(&self, state: ConnectionState) -> Vec<&Connection> {
        self.connections
            .values()
            .filter(|c| c.state == state)
            .collect()
    }

    /// Drop closed and errored connections
    pub fn prune_dead(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|_, c| !c.state.is_dead());
        before - self.connections.len()
    }

    /// Get statistics
    pub fn stats(&self) -> PeerStats {
        let mut stats = PeerStats {
            total_connections: self.connections.len(),
            ..PeerStats::default()
        };

        for connection in self.connections.values() {
            match connection.state {
                ConnectionState::Pending => stats.pending_connections += 1,
                ConnectionState::Open => stats.open_connections += 1,
                ConnectionState::Closed => stats.closed_connections += 1,
                ConnectionState::Errored => stats.errored_connections += 1,
            }
        }

        stats
    }
}
