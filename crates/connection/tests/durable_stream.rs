//! The durable stream transport against an in-process HTTP server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes as AxumBytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde::Deserialize;
use tokio::time;
use url::Url;
use veil_codec::{decode_frame_batch, encode_frame_batch, Message};
use veil_connection::{DurableStreamTransport, Transport};

/// One scripted answer for the read stream.
enum ScriptedRead {
    NoContent { cursor: &'static str },
    Data { frames: Vec<Bytes>, next_offset: &'static str },
    Fail,
}

#[derive(Default)]
struct ServerState {
    reads: Mutex<VecDeque<ScriptedRead>>,
    seen_queries: Mutex<Vec<(String, String)>>,
    writes: Mutex<Vec<Bytes>>,
}

#[derive(Deserialize)]
struct ReadQuery {
    cursor: String,
    offset: String,
}

async fn read_stream(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ReadQuery>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    state
        .seen_queries
        .lock()
        .unwrap()
        .push((query.cursor, query.offset));

    let scripted = state.reads.lock().unwrap().pop_front();

    let mut headers = HeaderMap::new();

    match scripted {
        Some(ScriptedRead::NoContent { cursor }) => {
            headers.insert("Stream-Cursor", cursor.parse().unwrap());
            (StatusCode::NO_CONTENT, headers, Vec::new())
        }
        Some(ScriptedRead::Data { frames, next_offset }) => {
            headers.insert("Stream-Next-Offset", next_offset.parse().unwrap());
            (
                StatusCode::OK,
                headers,
                encode_frame_batch(&frames).to_vec(),
            )
        }
        Some(ScriptedRead::Fail) => (StatusCode::INTERNAL_SERVER_ERROR, headers, Vec::new()),
        None => {
            // Empty script: behave like a long poll that timed out.
            time::sleep(Duration::from_millis(20)).await;
            (StatusCode::NO_CONTENT, headers, Vec::new())
        }
    }
}

async fn write_stream(State(state): State<Arc<ServerState>>, body: AxumBytes) -> StatusCode {
    state.writes.lock().unwrap().push(Bytes::from(body.to_vec()));

    StatusCode::OK
}

async fn serve(state: Arc<ServerState>) -> Url {
    let app = Router::new()
        .route("/out/:prefix/:client", get(read_stream))
        .route("/in/:prefix/:client", post(write_stream))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    drop(tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    }));

    Url::parse(&format!("http://{addr}/")).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_long_poll_positions_and_delivery() {
    let state = Arc::new(ServerState::default());

    {
        let mut reads = state.reads.lock().unwrap();
        reads.push_back(ScriptedRead::NoContent { cursor: "c1" });
        reads.push_back(ScriptedRead::Data {
            frames: vec![Message::Ping.encode()],
            next_offset: "7",
        });
    }

    let base = serve(Arc::clone(&state)).await;
    let transport = DurableStreamTransport::new(&base, "room", "client-9").unwrap();

    let mut conn = transport.connect().await.unwrap();

    // The scripted data frame arrives through the inbound channel.
    let frame = time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Message::decode(&frame).unwrap(), Message::Ping);

    // Writes land on the in-stream as an encoded batch.
    let outbound = Message::Document {
        document: "doc".into(),
        body: veil_codec::DocMessage::SyncDone,
    }
    .encode();
    conn.send(outbound.clone()).unwrap();

    let written = time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(body) = state.writes.lock().unwrap().first().cloned() {
                return body;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(decode_frame_batch(&written).unwrap(), vec![outbound]);

    // Positions advanced exactly as the headers instructed: the priming
    // poll starts at ("", "0"), the 204 advances the cursor, the data
    // response advances the offset.
    {
        let queries = state.seen_queries.lock().unwrap();
        assert_eq!(queries[0], (String::new(), "0".to_owned()));
        assert_eq!(queries[1], ("c1".to_owned(), "0".to_owned()));
        if let Some(third) = queries.get(2) {
            assert_eq!(third, &("c1".to_owned(), "7".to_owned()));
        }
    }

    conn.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_failure_closes_the_transport() {
    let state = Arc::new(ServerState::default());

    {
        let mut reads = state.reads.lock().unwrap();
        reads.push_back(ScriptedRead::NoContent { cursor: "c1" });
        reads.push_back(ScriptedRead::Fail);
    }

    let base = serve(Arc::clone(&state)).await;
    let transport = DurableStreamTransport::new(&base, "room", "client-9").unwrap();

    let mut conn = transport.connect().await.unwrap();

    // The scripted 500 tears the transport down; the inbound side closes.
    let closed = time::timeout(Duration::from_secs(5), conn.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_priming_failure_fails_connect() {
    let state = Arc::new(ServerState::default());
    state.reads.lock().unwrap().push_back(ScriptedRead::Fail);

    let base = serve(Arc::clone(&state)).await;
    let transport = DurableStreamTransport::new(&base, "room", "client-9").unwrap();

    assert!(transport.connect().await.is_err());
}
