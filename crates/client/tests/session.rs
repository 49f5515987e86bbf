//! Two document sessions converging through a live relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time;
use url::Url;
use veil_client::{DocumentSession, SessionEvent};
use veil_connection::{Connection, ConnectionOptions, Transport, WebsocketTransport};
use veil_primitives::ClientId;
use veil_relay::{router, RelayConfig, RelayState};

async fn spawn_relay() -> SocketAddr {
    let state = RelayState::new(RelayConfig::default());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    drop(tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    }));

    addr
}

/// Connections start disconnected so tests can subscribe to session events
/// before the first sync exchange fires.
fn connect_later(addr: SocketAddr, document: &str) -> Connection {
    let transport = WebsocketTransport::new(
        Url::parse(&format!("ws://{addr}/ws/{document}")).unwrap(),
    );

    Connection::new(
        vec![Arc::new(transport) as Arc<dyn Transport>],
        ConnectionOptions::default().without_auto_connect(),
    )
}

async fn next_event(subscription: &mut veil_client::SessionSubscription) -> SessionEvent {
    time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("session event should arrive")
        .expect("session alive")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_sessions_converge() {
    let addr = spawn_relay().await;

    // Alice attaches to an empty document; the first exchange synchronizes
    // nothing.
    let alice_conn = connect_later(addr, "notes");
    let alice = DocumentSession::attach(alice_conn.clone(), "notes".into(), ClientId(1));
    let mut alice_events = alice.subscribe();
    alice_conn.connect().unwrap();

    alice.wait_until_synced().await.unwrap();
    assert_eq!(alice.state().snapshot_id, None);

    // She establishes the document and writes on top of it.
    alice.submit_snapshot("S0".into(), Bytes::from_static(b"base")).unwrap();

    loop {
        if let SessionEvent::Snapshot { id, payload } = next_event(&mut alice_events).await {
            assert_eq!(id, "S0".into());
            assert_eq!(payload, Bytes::from_static(b"base"));
            break;
        }
    }

    alice.queue_update(Bytes::from_static(b"edit-1")).unwrap();
    alice.queue_update(Bytes::from_static(b"edit-2")).unwrap();

    // Her own echoes come back in server order.
    let mut seen_versions = Vec::new();
    while seen_versions.len() < 2 {
        if let SessionEvent::Update(update) = next_event(&mut alice_events).await {
            seen_versions.push(update.server_version);
        }
    }
    assert_eq!(seen_versions, vec![Some(1), Some(2)]);
    assert_eq!(alice.state().server_version, 2);

    // Bob attaches late and catches up: snapshot, both updates, synced.
    let bob_conn = connect_later(addr, "notes");
    let bob = DocumentSession::attach(bob_conn.clone(), "notes".into(), ClientId(2));
    let mut bob_events = bob.subscribe();
    bob_conn.connect().unwrap();

    bob.wait_until_synced().await.unwrap();
    assert_eq!(bob.state().snapshot_id, Some("S0".into()));
    assert_eq!(bob.state().server_version, 2);

    let mut caught_up = Vec::new();
    let mut synced = false;
    while !synced {
        match next_event(&mut bob_events).await {
            SessionEvent::Snapshot { id, .. } => caught_up.push(format!("snapshot:{id}")),
            SessionEvent::Update(update) => {
                caught_up.push(format!("v{}", update.server_version.unwrap()));
            }
            SessionEvent::Synced => synced = true,
        }
    }
    assert_eq!(caught_up, vec!["snapshot:S0", "v1", "v2"]);

    // Bob writes; Alice sees it as client 2, counter 1, version 3.
    bob.queue_update(Bytes::from_static(b"bob-edit")).unwrap();

    loop {
        if let SessionEvent::Update(update) = next_event(&mut alice_events).await {
            assert_eq!(update.client, ClientId(2));
            assert_eq!(update.counter, 1);
            assert_eq!(update.server_version, Some(3));
            assert_eq!(update.payload, Bytes::from_static(b"bob-edit"));
            break;
        }
    }

    alice_conn.destroy();
    bob_conn.destroy();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_updates_queued_before_snapshot_flush_after_adoption() {
    let addr = spawn_relay().await;

    let conn = connect_later(addr, "drafts");
    let session = DocumentSession::attach(conn.clone(), "drafts".into(), ClientId(7));
    let mut events = session.subscribe();
    conn.connect().unwrap();

    session.wait_until_synced().await.unwrap();

    // No snapshot yet: the update is held locally.
    session.queue_update(Bytes::from_static(b"early")).unwrap();
    session
        .submit_snapshot("S0".into(), Bytes::from_static(b"base"))
        .unwrap();

    // After adoption the held update goes out and is accepted as (7, 1).
    loop {
        if let SessionEvent::Update(update) = next_event(&mut events).await {
            assert_eq!(update.client, ClientId(7));
            assert_eq!(update.counter, 1);
            assert_eq!(update.server_version, Some(1));
            assert_eq!(update.payload, Bytes::from_static(b"early"));
            break;
        }
    }

    conn.destroy();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_awareness_flows_between_sessions() {
    let addr = spawn_relay().await;

    let alice_conn = connect_later(addr, "presence");
    let alice = DocumentSession::attach(alice_conn.clone(), "presence".into(), ClientId(1));
    alice_conn.connect().unwrap();
    alice.wait_until_synced().await.unwrap();

    let bob_conn = connect_later(addr, "presence");
    let bob = DocumentSession::attach(bob_conn.clone(), "presence".into(), ClientId(2));
    bob_conn.connect().unwrap();
    bob.wait_until_synced().await.unwrap();

    // Awareness rides the connection, not the session event stream: it is
    // ephemeral and uninterpreted, so it surfaces as a raw inbound message.
    let mut bob_inbound = bob_conn.subscribe();

    alice.set_awareness(Bytes::from_static(b"cursor@7")).unwrap();

    loop {
        let event = time::timeout(Duration::from_secs(5), bob_inbound.recv())
            .await
            .expect("awareness should arrive")
            .expect("connection alive");

        if let veil_connection::ConnectionEvent::Message(veil_codec::Message::Awareness {
            payload,
            ..
        }) = event
        {
            assert_eq!(payload, Bytes::from_static(b"cursor@7"));
            break;
        }
    }

    alice_conn.destroy();
    bob_conn.destroy();
}
