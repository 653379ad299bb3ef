// Mesh Tests
// Spawned managers converging over the in-process network and over TCP

use crate::common::{eventually, open_manager};
use meshdoc::storage::{MemoryStore, Persistence};
use meshdoc::sync::{ConnectionState, PeerSyncManager, SyncError, SyncHandle};
use meshdoc::transport::{MemoryNetwork, TcpTransport, TcpTransportConfig};
use meshdoc::{IdentityMode, SyncConfig};
use std::collections::BTreeSet;
use std::sync::Arc;

async fn spawn_on(network: &MemoryNetwork) -> SyncHandle {
    let (handle, _task) = open_manager(network, Arc::new(MemoryStore::new())).await.spawn();
    handle
}

async fn item_ids(handle: &SyncHandle) -> BTreeSet<String> {
    handle
        .document()
        .await
        .unwrap()
        .items
        .into_iter()
        .map(|item| item.id)
        .collect()
}

/// Wait until every handle holds exactly `expected`
async fn converged(handles: &[&SyncHandle], expected: &BTreeSet<String>) {
    for handle in handles {
        eventually(|| async { &item_ids(handle).await == expected }).await;
    }
}

#[tokio::test]
async fn test_two_peers_converge() {
    let network = MemoryNetwork::new();
    let a = spawn_on(&network).await;
    let b = spawn_on(&network).await;

    let first = a.add_item("bread").await.unwrap();
    a.connect(b.local_peer_id().clone()).await.unwrap();
    let second = b.add_item("butter").await.unwrap();

    let expected: BTreeSet<String> = [first, second].into_iter().collect();
    converged(&[&a, &b], &expected).await;
}

#[tokio::test]
async fn test_toggle_propagates() {
    let network = MemoryNetwork::new();
    let a = spawn_on(&network).await;
    let b = spawn_on(&network).await;

    b.connect(a.local_peer_id().clone()).await.unwrap();
    let id = a.add_item("call mom").await.unwrap();
    eventually(|| async { b.document().await.unwrap().item(&id).is_some() }).await;

    b.toggle_item(&id).await.unwrap();

    eventually(|| async {
        let document = a.document().await.unwrap();
        document.item(&id).map(|item| item.completed).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_changes_travel_across_hops() {
    let network = MemoryNetwork::new();
    let a = spawn_on(&network).await;
    let b = spawn_on(&network).await;
    let c = spawn_on(&network).await;

    // a - b - c, no direct link between a and c
    a.connect(b.local_peer_id().clone()).await.unwrap();
    c.connect(b.local_peer_id().clone()).await.unwrap();

    let from_a = a.add_item("from a").await.unwrap();
    let from_c = c.add_item("from c").await.unwrap();

    let expected: BTreeSet<String> = [from_a, from_c].into_iter().collect();
    converged(&[&a, &b, &c], &expected).await;

    let connections = b.connections().await.unwrap();
    assert_eq!(connections.len(), 2);
    assert!(connections.iter().all(|c| c.state() == ConnectionState::Open));
}

#[tokio::test]
async fn test_destroyed_peer_keeps_local_edits() {
    let network = MemoryNetwork::new();
    let a = spawn_on(&network).await;
    let b = spawn_on(&network).await;

    a.connect(b.local_peer_id().clone()).await.unwrap();
    let shared = a.add_item("shared").await.unwrap();
    eventually(|| async { b.document().await.unwrap().item(&shared).is_some() }).await;

    a.destroy().await.unwrap();
    let private = a.add_item("private").await.unwrap();

    eventually(|| async {
        let connections = b.connections().await.unwrap();
        connections.iter().all(|c| c.state() == ConnectionState::Closed)
    })
    .await;
    assert!(a.document().await.unwrap().item(&private).is_some());
    assert!(b.document().await.unwrap().item(&private).is_none());
    assert!(matches!(
        a.connect(b.local_peer_id().clone()).await,
        Err(SyncError::Destroyed)
    ));
}

#[tokio::test]
async fn test_task_ends_when_handles_are_dropped() {
    let network = MemoryNetwork::new();
    let (handle, task) = open_manager(&network, Arc::new(MemoryStore::new())).await.spawn();
    let id = handle.local_peer_id().clone();

    let clone = handle.clone();
    drop(handle);
    assert!(clone.stats().await.is_ok());
    drop(clone);

    task.await.unwrap();
    assert!(!network.contains(&id));
}

// ============================================================================
// TCP
// ============================================================================

async fn open_tcp(backend: Arc<MemoryStore>, transport: TcpTransport) -> PeerSyncManager {
    PeerSyncManager::builder(SyncConfig::default().with_identity(IdentityMode::Persisted))
        .persistence(Persistence::Enabled(backend))
        .open(Box::new(transport))
        .await
        .unwrap()
}

fn loopback() -> TcpTransportConfig {
    TcpTransportConfig::new().with_bind_address("127.0.0.1")
}

#[tokio::test]
async fn test_peers_converge_over_tcp() {
    let listener = open_tcp(Arc::new(MemoryStore::new()), TcpTransport::new(loopback())).await;
    let listener_id = listener.local_peer_id().clone();
    let listener_addr = listener.listen_addr().unwrap();

    let mut transport = TcpTransport::new(loopback());
    transport.add_address(listener_id.clone(), listener_addr);
    let dialer = open_tcp(Arc::new(MemoryStore::new()), transport).await;

    let (listener, _listener_task) = listener.spawn();
    let (dialer, _dialer_task) = dialer.spawn();

    let before = listener.add_item("written before connecting").await.unwrap();
    dialer.connect(listener_id).await.unwrap();
    let after = dialer.add_item("written after connecting").await.unwrap();

    let expected: BTreeSet<String> = [before.clone(), after].into_iter().collect();
    converged(&[&listener, &dialer], &expected).await;

    listener.toggle_item(&before).await.unwrap();
    eventually(|| async {
        let document = dialer.document().await.unwrap();
        document.item(&before).map(|item| item.completed).unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn test_redial_over_tcp_keeps_peers_in_sync() {
    let listener = open_tcp(Arc::new(MemoryStore::new()), TcpTransport::new(loopback())).await;
    let listener_id = listener.local_peer_id().clone();
    let listener_addr = listener.listen_addr().unwrap();

    let mut transport = TcpTransport::new(loopback());
    transport.add_address(listener_id.clone(), listener_addr);
    let dialer = open_tcp(Arc::new(MemoryStore::new()), transport).await;
    let dialer_id = dialer.local_peer_id().clone();

    let (listener, _listener_task) = listener.spawn();
    let (dialer, _dialer_task) = dialer.spawn();

    dialer.connect(listener_id.clone()).await.unwrap();
    dialer.connect(listener_id.clone()).await.unwrap();
    let from_dialer = dialer.add_item("sent after a redial").await.unwrap();
    let from_listener = listener.add_item("answered over the new stream").await.unwrap();

    let expected: BTreeSet<String> = [from_dialer, from_listener].into_iter().collect();
    converged(&[&listener, &dialer], &expected).await;

    for (handle, peer) in [(&listener, &dialer_id), (&dialer, &listener_id)] {
        let connections = handle.connections().await.unwrap();
        let connection = connections.iter().find(|c| c.peer_id() == peer).unwrap();
        assert_eq!(connection.state(), ConnectionState::Open);
    }
}
