// Dispatcher - runs a PeerSyncManager on its own task
//
// All document state stays on that task. Callers talk to it through a
// cloneable SyncHandle; transport events and commands are served one at a
// time, in arrival order.

use crate::document::Document;
use crate::sync::manager::{PeerSyncManager, SyncError, SyncStats};
use crate::sync::peer::Connection;
use crate::transport::PeerId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

enum Command {
    AddItem {
        text: String,
        reply: oneshot::Sender<String>,
    },
    ToggleItem {
        id: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Connect {
        peer: PeerId,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Document {
        reply: oneshot::Sender<Document>,
    },
    Connections {
        reply: oneshot::Sender<Vec<Connection>>,
    },
    Stats {
        reply: oneshot::Sender<SyncStats>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable access to a spawned [`PeerSyncManager`]
#[derive(Clone, Debug)]
pub struct SyncHandle {
    local_id: PeerId,
    commands: mpsc::Sender<Command>,
}

impl SyncHandle {
    /// The manager's peer id
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Append an item; returns its id
    pub async fn add_item(&self, text: impl Into<String>) -> Result<String, SyncError> {
        let text = text.into();
        self.request(|reply| Command::AddItem { text, reply }).await
    }

    /// Flip the completion of an item
    pub async fn toggle_item(&self, id: &str) -> Result<(), SyncError> {
        let id = id.to_string();
        self.request(|reply| Command::ToggleItem { id, reply }).await?
    }

    /// Connect to a remote peer
    pub async fn connect(&self, peer: PeerId) -> Result<(), SyncError> {
        self.request(|reply| Command::Connect { peer, reply }).await?
    }

    /// Snapshot of the current document
    pub async fn document(&self) -> Result<Document, SyncError> {
        self.request(|reply| Command::Document { reply }).await
    }

    /// Snapshot of all connections
    pub async fn connections(&self) -> Result<Vec<Connection>, SyncError> {
        self.request(|reply| Command::Connections { reply }).await
    }

    /// Snapshot of the sync counters
    pub async fn stats(&self) -> Result<SyncStats, SyncError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Shut down the transport; the task keeps serving local commands
    pub async fn destroy(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::Destroy { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SyncError::ShutDown)?;
        rx.await.map_err(|_| SyncError::ShutDown)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::AddItem { .. } => "AddItem",
            Command::ToggleItem { .. } => "ToggleItem",
            Command::Connect { .. } => "Connect",
            Command::Document { .. } => "Document",
            Command::Connections { .. } => "Connections",
            Command::Stats { .. } => "Stats",
            Command::Destroy { .. } => "Destroy",
        };
        f.write_str(name)
    }
}

impl PeerSyncManager {
    /// Run the manager on a tokio task.
    ///
    /// The task ends when every [`SyncHandle`] is dropped; the transport is
    /// shut down on the way out.
    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.command_buffer);
        let handle = SyncHandle {
            local_id: self.local_peer_id().clone(),
            commands: tx,
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut transport_live = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                live = self.process_next_event(), if transport_live && !self.is_destroyed() => {
                    transport_live = live;
                }
            }
        }

        self.destroy().await;
        debug!(peer = %self.local_peer_id(), "Sync task finished");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddItem { text, reply } => {
                let _ = reply.send(self.add_item(text));
            }
            Command::ToggleItem { id, reply } => {
                let _ = reply.send(self.toggle_item(&id));
            }
            Command::Connect { peer, reply } => {
                let _ = reply.send(self.connect_to_peer(peer).await);
            }
            Command::Document { reply } => {
                let _ = reply.send(self.document().clone());
            }
            Command::Connections { reply } => {
                let connections = self.connections().all().into_iter().cloned().collect();
                let _ = reply.send(connections);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats().clone());
            }
            Command::Destroy { reply } => {
                self.destroy().await;
                let _ = reply.send(());
            }
        }
    }
}
