// In-process transport
// Endpoints on a shared MemoryNetwork exchange events through tokio channels.

use crate::transport::{
    PeerId, Transport, TransportError, TransportEvent, TransportState, TransportStats,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Registry of live in-process endpoints
#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<PeerId, EventSender>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peer ids currently registered
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Check if a peer is registered
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.lock().contains_key(peer)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, EventSender>> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, peer: PeerId, sender: EventSender) -> Result<(), TransportError> {
        let mut endpoints = self.lock();
        if endpoints.contains_key(&peer) {
            return Err(TransportError::PeerIdTaken(peer));
        }
        endpoints.insert(peer, sender);
        Ok(())
    }

    fn unregister(&self, peer: &PeerId) {
        self.lock().remove(peer);
    }

    fn deliver(&self, to: &PeerId, event: TransportEvent) -> Result<(), TransportError> {
        let endpoints = self.lock();
        let sender = endpoints
            .get(to)
            .ok_or_else(|| TransportError::NotConnected(to.clone()))?;
        sender
            .send(event)
            .map_err(|_| TransportError::NotConnected(to.clone()))
    }
}

/// A transport endpoint living on a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: Option<PeerId>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    /// Peers we have exchanged an open with
    links: HashSet<PeerId>,
    state: TransportState,
    stats: TransportStats,
}

impl MemoryTransport {
    pub fn new(network: MemoryNetwork) -> Self {
        Self {
            network,
            local: None,
            events_rx: None,
            links: HashSet::new(),
            state: TransportState::Stopped,
            stats: TransportStats::default(),
        }
    }

    fn local(&self) -> Result<&PeerId, TransportError> {
        match (&self.state, &self.local) {
            (TransportState::Running, Some(local)) => Ok(local),
            _ => Err(TransportError::NotRunning),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&mut self, local: PeerId) -> Result<(), TransportError> {
        if self.state.is_running() {
            return Err(TransportError::AlreadyRunning);
        }
        if !self.state.can_transition_to(&TransportState::Running) {
            return Err(TransportError::InvalidOperation(
                "Transport was shut down".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.network.register(local.clone(), tx)?;

        debug!(peer = %local, "Memory endpoint registered");
        self.local = Some(local);
        self.events_rx = Some(rx);
        self.state = TransportState::Running;
        Ok(())
    }

    async fn connect(&mut self, remote: &PeerId) -> Result<(), TransportError> {
        let local = self.local()?.clone();
        if &local == remote {
            return Err(TransportError::InvalidOperation(
                "Cannot connect to self".to_string(),
            ));
        }
        if !self.network.contains(remote) {
            return Err(TransportError::UnknownPeer(remote.clone()));
        }

        self.network.deliver(remote, TransportEvent::Incoming { peer: local.clone() })?;
        self.network.deliver(remote, TransportEvent::Open { peer: local.clone() })?;
        self.network.deliver(&local, TransportEvent::Open { peer: remote.clone() })?;

        self.links.insert(remote.clone());
        self.stats.connections_total += 1;
        Ok(())
    }

    fn send(&mut self, remote: &PeerId, payload: &str) -> Result<(), TransportError> {
        let local = self.local()?.clone();
        let event = TransportEvent::Data {
            peer: local,
            payload: payload.to_string(),
        };

        match self.network.deliver(remote, event) {
            Ok(()) => {
                self.links.insert(remote.clone());
                self.stats.messages_sent += 1;
                self.stats.bytes_sent += payload.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.errors += 1;
                Err(e)
            }
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events_rx.as_mut()?.recv().await?;

        match &event {
            TransportEvent::Data { .. } => self.stats.messages_received += 1,
            TransportEvent::Incoming { peer } => {
                self.links.insert(peer.clone());
                self.stats.connections_total += 1;
            }
            _ => {}
        }
        Some(event)
    }

    async fn shutdown(&mut self) {
        let Some(local) = self.local.take() else {
            self.state = TransportState::ShutDown;
            return;
        };

        self.network.unregister(&local);
        for peer in self.links.drain() {
            let _ = self.network.deliver(
                &peer,
                TransportEvent::Closed {
                    peer: local.clone(),
                    reason: "Remote peer shut down".to_string(),
                },
            );
        }

        self.events_rx = None;
        self.state = TransportState::ShutDown;
        debug!(peer = %local, "Memory endpoint shut down");
    }

    fn local_peer_id(&self) -> Option<&PeerId> {
        self.local.as_ref()
    }

    fn state(&self) -> &TransportState {
        &self.state
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
