// PeerSyncManager - the synchronized store engine
//
// Owns the document store, the local peer identity, the connection registry
// and the transport. Local edits and merged remote documents take the same
// path: validate -> persist -> broadcast.

use crate::config::{ConfigError, IdentityMode, SyncConfig};
use crate::document::{merge_with_result, Clock, Document, DocumentError, Item};
use crate::storage::{ErrorHandler, Mutator, Persistence, ValueStore};
use crate::sync::peer::{ConnectionRegistry, Direction, PeerError};
use crate::sync::protocol::DocumentCodec;
use crate::transport::{PeerId, Transport, TransportError, TransportEvent, TransportStats};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors surfaced by the sync layer
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Store has been destroyed")]
    Destroyed,

    #[error("Sync task is no longer running")]
    ShutDown,
}

/// Counters kept by the manager
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames received from peers
    pub messages_received: u64,
    /// Frames that failed to decode or validate
    pub malformed_payloads: u64,
    /// Remote documents that changed the local one
    pub merges_applied: u64,
    /// Remote documents with nothing new
    pub merges_ignored: u64,
    /// Local edits (add, toggle)
    pub local_mutations: u64,
    /// Broadcast rounds that reached at least one peer
    pub broadcasts: u64,
    /// Frames the transport refused
    pub sends_failed: u64,
}

/// Builder for [`PeerSyncManager`]
pub struct SyncManagerBuilder {
    config: SyncConfig,
    persistence: Persistence,
    on_error: Option<ErrorHandler<Document>>,
}

impl SyncManagerBuilder {
    /// Persist through the given capability (default: disabled)
    pub fn persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Route storage failures to a custom handler
    pub fn on_error(mut self, on_error: ErrorHandler<Document>) -> Self {
        self.on_error = Some(on_error);
        self
    }

    /// Load the document, resolve the local peer id and start the transport
    pub async fn open(
        self,
        mut transport: Box<dyn Transport>,
    ) -> Result<PeerSyncManager, SyncError> {
        self.config.validate()?;

        let initial = Document::new();
        let key = self.config.storage_key.clone();
        let store = match self.on_error {
            Some(on_error) => {
                ValueStore::with_error_handler(key, initial, self.persistence.clone(), on_error)
            }
            None => ValueStore::new(key, initial, self.persistence.clone()),
        };

        let local_id = resolve_peer_id(&self.config, store.get(), &self.persistence);
        transport.start(local_id.clone()).await?;
        info!(peer = %local_id, key = %store.key(), "My peer ID is ready");

        let mut clock = Clock::new();
        if let Some(latest) = store.get().items.iter().map(|item| item.updated_at).max() {
            clock.observe(latest);
        }

        Ok(PeerSyncManager {
            connections: ConnectionRegistry::new(local_id.clone()),
            local_id,
            store,
            transport,
            clock,
            stats: SyncStats::default(),
            command_buffer: self.config.command_buffer,
            destroyed: false,
        })
    }
}

/// Pick the local peer id according to the identity mode
fn resolve_peer_id(config: &SyncConfig, document: &Document, persistence: &Persistence) -> PeerId {
    match config.identity {
        IdentityMode::FromDocument => PeerId::new(document.id.clone()),
        IdentityMode::Persisted => {
            let Some(backend) = persistence.backend() else {
                return PeerId::generate();
            };

            let key = config.sync_id_key();
            match backend.get(&key) {
                Ok(Some(id)) if !id.is_empty() => PeerId::new(id),
                Ok(_) => {
                    let id = PeerId::generate();
                    if let Err(e) = backend.set(&key, id.as_str()) {
                        warn!(key = %key, error = %e, "Failed to persist peer id");
                    }
                    id
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to read peer id, using an ephemeral one");
                    PeerId::generate()
                }
            }
        }
    }
}

/// A document store synchronized with every connected peer
pub struct PeerSyncManager {
    local_id: PeerId,
    store: ValueStore<Document>,
    connections: ConnectionRegistry,
    transport: Box<dyn Transport>,
    clock: Clock,
    stats: SyncStats,
    pub(crate) command_buffer: usize,
    destroyed: bool,
}

impl PeerSyncManager {
    /// Start building a manager
    pub fn builder(config: SyncConfig) -> SyncManagerBuilder {
        SyncManagerBuilder {
            config,
            persistence: Persistence::Disabled,
            on_error: None,
        }
    }

    /// Our peer id on the mesh
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_id
    }

    /// The current document
    pub fn document(&self) -> &Document {
        self.store.get()
    }

    /// The connection registry
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Get statistics
    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Get transport statistics
    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Where peers can dial us, if the transport listens
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.transport.listen_addr()
    }

    /// Check if [`PeerSyncManager::destroy`] was called
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    // ========================================================================
    // CONNECTIONS
    // ========================================================================

    /// Ask the transport for a connection to `remote`.
    ///
    /// The connection is registered before the request; a failed request
    /// leaves it `Errored` and is not retried.
    pub async fn connect_to_peer(&mut self, remote: PeerId) -> Result<(), SyncError> {
        if self.destroyed {
            return Err(SyncError::Destroyed);
        }
        if let Err(e) = self.connections.register(remote.clone(), Direction::Outbound) {
            warn!(peer = %remote, error = %e, "Refusing connection");
            return Err(e.into());
        }

        info!(peer = %remote, "Connecting to peer");
        if let Err(e) = self.transport.connect(&remote).await {
            warn!(peer = %remote, error = %e, "Connection request failed");
            let _ = self.connections.mark_errored(&remote, e.to_string());
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop closed and errored connections
    pub fn prune_dead_connections(&mut self) -> usize {
        self.connections.prune_dead()
    }

    // ========================================================================
    // EVENT HANDLING
    // ========================================================================

    /// Wait for the next transport event and handle it.
    ///
    /// Returns `false` once the transport has no more events.
    pub async fn process_next_event(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        match self.transport.next_event().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// React to one transport event
    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.destroyed {
            return;
        }

        match event {
            TransportEvent::Incoming { peer } => {
                match self.connections.register(peer.clone(), Direction::Inbound) {
                    Ok(_) => debug!(peer = %peer, "Inbound connection"),
                    Err(e) => warn!(peer = %peer, error = %e, "Rejecting inbound connection"),
                }
            }
            TransportEvent::Open { peer } => {
                if let Err(e) = self.connections.mark_open(&peer) {
                    warn!(peer = %peer, error = %e, "Ignoring connection open");
                    return;
                }
                info!(peer = %peer, "Connection open");
                // Bootstrap the new peer with our full state
                self.send_document_to(&peer);
            }
            TransportEvent::Data { peer, payload } => self.on_message(&peer, &payload),
            TransportEvent::Closed { peer, reason } => {
                info!(peer = %peer, reason = %reason, "Connection closed");
                let _ = self.connections.mark_closed(&peer);
            }
            TransportEvent::Error { peer: Some(peer), error } => {
                warn!(peer = %peer, error = %error, "Connection error");
                let _ = self.connections.mark_errored(&peer, error.to_string());
            }
            TransportEvent::Error { peer: None, error } => {
                warn!(error = %error, "Transport error");
            }
        }
    }

    /// Merge a frame received from `from` into the current document
    pub fn on_message(&mut self, from: &PeerId, payload: &str) {
        self.stats.messages_received += 1;
        self.connections.record_received(from);

        let remote = match DocumentCodec::decode(payload) {
            Ok(remote) => remote,
            Err(e) => {
                self.stats.malformed_payloads += 1;
                warn!(peer = %from, error = %e, "Ignoring malformed payload");
                return;
            }
        };
        if let Err(e) = remote.check_timestamps(Clock::remote_limit()) {
            self.stats.malformed_payloads += 1;
            warn!(peer = %from, error = %e, "Ignoring document from the future");
            return;
        }

        let outcome = merge_with_result(self.store.get(), &remote);
        if !outcome.changed() {
            self.stats.merges_ignored += 1;
            debug!(peer = %from, "Remote document has nothing new");
            return;
        }

        debug!(
            peer = %from,
            added = outcome.added,
            replaced = outcome.replaced,
            "Merged remote document"
        );
        if let Some(latest) = outcome.document.items.iter().map(|item| item.updated_at).max() {
            self.clock.observe(latest);
        }
        self.stats.merges_applied += 1;
        self.mutate(outcome.document);
    }

    // ========================================================================
    // DOCUMENT OPERATIONS
    // ========================================================================

    /// Append a new item and return its id
    pub fn add_item(&mut self, text: impl Into<String>) -> String {
        let item = Item::new(text, self.clock.now());
        let id = item.id.clone();

        let next = self.store.get().with_item_added(item);
        self.stats.local_mutations += 1;
        self.mutate(next);
        id
    }

    /// Flip the completion of an item
    pub fn toggle_item(&mut self, id: &str) -> Result<(), SyncError> {
        let next = self.store.get().with_item_toggled(id, self.clock.now())?;
        self.stats.local_mutations += 1;
        self.mutate(next);
        Ok(())
    }

    /// Write the current document back to storage
    pub fn flush(&mut self) {
        self.store.flush();
    }

    /// Stop the transport. Local edits still persist but are no longer sent.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.transport.shutdown().await;
        self.destroyed = true;
        info!(peer = %self.local_id, "Sync store destroyed");
    }

    // ========================================================================
    // BROADCAST
    // ========================================================================

    /// Send the current document to every open connection
    fn broadcast(&mut self) {
        if self.destroyed {
            return;
        }

        let peers = self.connections.open_peers();
        if peers.is_empty() {
            debug!("No open connections, skipping broadcast");
            return;
        }

        let payload = match DocumentCodec::encode(self.store.get()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode document");
                return;
            }
        };

        let delivered = peers
            .iter()
            .filter(|peer| self.send_payload(peer, &payload))
            .count();
        if delivered > 0 {
            self.stats.broadcasts += 1;
        }
        debug!(peers = peers.len(), delivered, "Broadcast document");
    }

    fn send_document_to(&mut self, peer: &PeerId) {
        match DocumentCodec::encode(self.store.get()) {
            Ok(payload) => {
                self.send_payload(peer, &payload);
            }
            Err(e) => error!(error = %e, "Failed to encode document"),
        }
    }

    /// Hand a frame to the transport; failures mark the connection errored
    fn send_payload(&mut self, peer: &PeerId, payload: &str) -> bool {
        match self.transport.send(peer, payload) {
            Ok(()) => {
                self.connections.record_sent(peer);
                true
            }
            Err(e) => {
                self.stats.sends_failed += 1;
                warn!(peer = %peer, error = %e, "Send failed");
                let _ = self.connections.mark_errored(peer, e.to_string());
                false
            }
        }
    }
}

impl Mutator<Document> for PeerSyncManager {
    fn current(&self) -> &Document {
        self.store.get()
    }

    fn mutate(&mut self, document: Document) {
        if let Err(e) = document.validate() {
            warn!(error = %e, "Rejecting invalid document");
            return;
        }
        self.store.mutate(document);
        self.broadcast();
    }
}
