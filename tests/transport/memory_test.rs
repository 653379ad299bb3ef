// Memory Transport Tests

use meshdoc::transport::{
    MemoryNetwork, MemoryTransport, PeerId, Transport, TransportError, TransportEvent,
    TransportState,
};

async fn started(network: &MemoryNetwork, id: &str) -> MemoryTransport {
    let mut transport = MemoryTransport::new(network.clone());
    transport.start(PeerId::new(id)).await.unwrap();
    transport
}

#[tokio::test]
async fn test_lifecycle() {
    let network = MemoryNetwork::new();
    let mut transport = MemoryTransport::new(network.clone());
    assert_eq!(transport.state(), &TransportState::Stopped);
    assert_eq!(transport.local_peer_id(), None);

    transport.start(PeerId::new("a")).await.unwrap();
    assert!(transport.state().is_running());
    assert_eq!(network.peers(), vec![PeerId::new("a")]);
    assert_eq!(
        transport.start(PeerId::new("a")).await,
        Err(TransportError::AlreadyRunning)
    );

    transport.shutdown().await;
    assert_eq!(transport.state(), &TransportState::ShutDown);
    assert!(network.peers().is_empty());
    assert_eq!(transport.next_event().await, None);
    assert!(transport.start(PeerId::new("a")).await.is_err());
}

#[tokio::test]
async fn test_data_is_delivered_in_order() {
    let network = MemoryNetwork::new();
    let mut a = started(&network, "a").await;
    let mut b = started(&network, "b").await;
    a.connect(&PeerId::new("b")).await.unwrap();

    a.send(&PeerId::new("b"), "one").unwrap();
    a.send(&PeerId::new("b"), "two").unwrap();

    let mut payloads = Vec::new();
    while payloads.len() < 2 {
        if let Some(TransportEvent::Data { peer, payload }) = b.next_event().await {
            assert_eq!(peer, PeerId::new("a"));
            payloads.push(payload);
        }
    }
    assert_eq!(payloads, vec!["one", "two"]);
    assert_eq!(a.stats().messages_sent, 2);
    assert_eq!(a.stats().bytes_sent, 6);
    assert_eq!(b.stats().messages_received, 2);
}

#[tokio::test]
async fn test_connect_errors() {
    let network = MemoryNetwork::new();
    let mut a = started(&network, "a").await;

    assert_eq!(
        a.connect(&PeerId::new("missing")).await,
        Err(TransportError::UnknownPeer(PeerId::new("missing")))
    );
    assert!(matches!(
        a.connect(&PeerId::new("a")).await,
        Err(TransportError::InvalidOperation(_))
    ));

    let mut stopped = MemoryTransport::new(network);
    assert_eq!(
        stopped.connect(&PeerId::new("a")).await,
        Err(TransportError::NotRunning)
    );
}

#[tokio::test]
async fn test_send_to_departed_peer_fails() {
    let network = MemoryNetwork::new();
    let mut a = started(&network, "a").await;
    let mut b = started(&network, "b").await;
    a.connect(&PeerId::new("b")).await.unwrap();
    b.shutdown().await;

    let result = a.send(&PeerId::new("b"), "hello?");
    assert_eq!(result, Err(TransportError::NotConnected(PeerId::new("b"))));
    assert_eq!(a.stats().errors, 1);
}

#[tokio::test]
async fn test_shutdown_notifies_linked_peers() {
    let network = MemoryNetwork::new();
    let mut a = started(&network, "a").await;
    let mut b = started(&network, "b").await;
    a.connect(&PeerId::new("b")).await.unwrap();

    // Drain Incoming and Open
    b.next_event().await;
    b.next_event().await;

    a.shutdown().await;

    assert!(matches!(
        b.next_event().await,
        Some(TransportEvent::Closed { peer, .. }) if peer == PeerId::new("a")
    ));
}
