//! The client connection core against a live relay, over both stacks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time;
use url::Url;
use veil_codec::{DocMessage, Message, SnapshotFrame, UpdateFrame};
use veil_connection::{
    Connection, ConnectionEvent, ConnectionOptions, DurableStreamTransport, EventSourceTransport,
    Transport, TransportKind, WebsocketTransport,
};
use veil_primitives::MessageId;
use veil_relay::{router, RelayConfig, RelayState};

async fn spawn_relay() -> SocketAddr {
    let config = RelayConfig {
        ping_interval_ms: 200,
        poll_timeout_ms: 200,
        ..RelayConfig::default()
    };

    let state = RelayState::new(config);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    drop(tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    }));

    addr
}

fn snapshot_message(document: &str) -> Message {
    Message::Document {
        document: document.into(),
        body: DocMessage::Update(UpdateFrame::Snapshot(SnapshotFrame {
            id: "S0".into(),
            parent_id: None,
            payload: Bytes::from_static(&[9]),
        })),
    }
}

/// Sends a snapshot and waits for its ACK to retire the in-flight entry.
async fn roundtrip(connection: &Connection, document: &str) {
    let mut events = connection.subscribe();

    let message = snapshot_message(document);
    let message_id = message.id();
    connection.send(message).unwrap();

    let mut acked = false;
    let mut drained = false;

    while !(acked && drained) {
        match time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("relay should answer")
            .expect("connection alive")
        {
            ConnectionEvent::Message(Message::Ack { message_id: id }) if id == message_id => {
                acked = true;
            }
            ConnectionEvent::MessagesInFlight(false) => drained = true,
            _ => {}
        }
    }

    assert_eq!(connection.in_flight_message_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_websocket_stack_end_to_end() {
    let addr = spawn_relay().await;

    let transport = WebsocketTransport::new(
        Url::parse(&format!("ws://{addr}/ws/doc-live")).unwrap(),
    );

    let connection = Connection::new(
        vec![Arc::new(transport) as Arc<dyn Transport>],
        ConnectionOptions::default(),
    );

    connection.wait_until_connected().await.unwrap();
    assert_eq!(connection.connection_type(), Some(TransportKind::Websocket));

    roundtrip(&connection, "doc-live").await;

    connection.destroy();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_source_stack_end_to_end() {
    let addr = spawn_relay().await;

    let transport = EventSourceTransport::new(
        Url::parse(&format!("http://{addr}/events/doc-sse")).unwrap(),
        Url::parse(&format!("http://{addr}/documents/doc-sse")).unwrap(),
    );

    let connection = Connection::new(
        vec![Arc::new(transport) as Arc<dyn Transport>],
        ConnectionOptions::default(),
    );

    connection.wait_until_connected().await.unwrap();
    assert_eq!(
        connection.connection_type(),
        Some(TransportKind::EventSource)
    );

    roundtrip(&connection, "doc-sse").await;

    // The stored snapshot also comes back as a broadcast on the SSE leg.
    let mut events = connection.subscribe();
    let update = Message::Document {
        document: "doc-sse".into(),
        body: DocMessage::Update(UpdateFrame::Updates(vec![veil_codec::UpdateRecord {
            snapshot_id: "S0".into(),
            client: 7.into(),
            counter: 1,
            server_version: None,
            payload: Bytes::from_static(b"edit"),
        }])),
    };
    connection.send(update).unwrap();

    loop {
        match time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("broadcast should arrive")
            .expect("connection alive")
        {
            ConnectionEvent::Message(Message::Document {
                body: DocMessage::Update(UpdateFrame::Updates(updates)),
                ..
            }) => {
                assert_eq!(updates[0].server_version, Some(1));
                break;
            }
            _ => {}
        }
    }

    connection.destroy();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_durable_stream_stack_end_to_end() {
    let addr = spawn_relay().await;

    let base = Url::parse(&format!("http://{addr}/")).unwrap();
    let transport = DurableStreamTransport::new(&base, "doc-lane", "lane-client-1").unwrap();

    let connection = Connection::new(
        vec![Arc::new(transport) as Arc<dyn Transport>],
        ConnectionOptions::default(),
    );

    connection.wait_until_connected().await.unwrap();
    assert_eq!(
        connection.connection_type(),
        Some(TransportKind::DurableStream)
    );

    // The ACK comes back through the long-polled out-lane.
    roundtrip(&connection, "doc-lane").await;

    connection.destroy();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fallback_reaches_the_relay_when_websocket_is_dead() {
    let addr = spawn_relay().await;

    // The preferred endpoint points nowhere; the half-duplex pair works.
    let dead = WebsocketTransport::new(Url::parse("ws://127.0.0.1:1/ws/doc-fb").unwrap());
    let fallback = EventSourceTransport::new(
        Url::parse(&format!("http://{addr}/events/doc-fb")).unwrap(),
        Url::parse(&format!("http://{addr}/documents/doc-fb")).unwrap(),
    );

    let connection = Connection::new(
        vec![
            Arc::new(dead) as Arc<dyn Transport>,
            Arc::new(fallback) as Arc<dyn Transport>,
        ],
        ConnectionOptions::default(),
    );

    connection.wait_until_connected().await.unwrap();
    assert_eq!(
        connection.connection_type(),
        Some(TransportKind::EventSource)
    );

    roundtrip(&connection, "doc-fb").await;

    connection.destroy();
}

// Sanity: the id a client acks with is derived from the frame bytes, so
// both sides agree without ever transmitting it.
#[test]
fn test_ack_ids_are_frame_addresses() {
    let message = snapshot_message("doc");

    assert_eq!(message.id(), MessageId::of(&message.encode()));
}
