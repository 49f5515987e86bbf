//! Durable stream surface: append-only per-client lanes with long-polling.
//!
//! Each client of a document owns a lane pair: it POSTs encoded message
//! batches to `in/<document>/<client-id>` and long-polls
//! `out/<document>/<client-id>` with `cursor` and `offset` query
//! parameters. Replies to its own frames and the document's broadcasts are
//! appended to its out-lane; readers follow the `Stream-Next-Offset` and
//! `Stream-Cursor` response headers, and a 204 means "nothing new within the
//! poll window".

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use veil_codec::{decode_frame_batch, encode_frame_batch};
use veil_primitives::DocumentId;

use crate::dispatch::process_frame;
use crate::RelayState;

const NEXT_OFFSET_HEADER: &str = "Stream-Next-Offset";
const CURSOR_HEADER: &str = "Stream-Cursor";

/// One client's append-only out-stream.
#[derive(Debug, Default)]
pub(crate) struct Lane {
    frames: Mutex<Vec<Bytes>>,
    appended: Notify,
}

impl Lane {
    async fn append(&self, frame: Bytes) {
        self.frames.lock().await.push(frame);
        self.appended.notify_waiters();
    }

    /// Everything past `offset`, with the new offset; `None` when nothing
    /// is there yet.
    async fn read_from(&self, offset: usize) -> Option<(Vec<Bytes>, usize)> {
        let frames = self.frames.lock().await;

        if frames.len() <= offset {
            return None;
        }

        Some((frames[offset..].to_vec(), frames.len()))
    }
}

/// The lanes of every (document, client) pair seen so far.
///
/// A lane is created on first contact from either side; creation also
/// starts the task that drains the document's broadcasts into it.
#[derive(Debug, Default)]
pub(crate) struct StreamLanes {
    lanes: DashMap<(DocumentId, String), Arc<Lane>>,
}

impl StreamLanes {
    pub fn lane(&self, state: &Arc<RelayState>, document: &DocumentId, client: &str) -> Arc<Lane> {
        match self.lanes.entry((document.clone(), client.to_owned())) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Arc::clone(entry.get()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let lane = Arc::new(Lane::default());
                let _ = entry.insert(Arc::clone(&lane));

                // Drain the document's broadcasts into the new lane.
                let mut broadcasts = state.hub.subscribe(document);
                let drain_lane = Arc::clone(&lane);
                let client = client.to_owned();

                drop(tokio::spawn(async move {
                    loop {
                        match broadcasts.recv().await {
                            Ok(frame) => drain_lane.append(frame).await,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(client_id = %client, skipped, "stream lane lagged; frames lost");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }));

                lane
            }
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct ReadQuery {
    #[serde(default)]
    cursor: String,
    #[serde(default)]
    offset: String,
}

/// `GET /out/:document/:client` — long-poll the client's out-lane.
pub(crate) async fn handle_read(
    State(state): State<Arc<RelayState>>,
    Path((document, client)): Path<(String, String)>,
    Query(query): Query<ReadQuery>,
) -> impl IntoResponse {
    let document = DocumentId::from(document);

    let offset: usize = match query.offset.parse() {
        Ok(offset) => offset,
        Err(_) if query.offset.is_empty() => 0,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "invalid offset").into_response();
        }
    };

    let lane = state.stream_lanes.lane(&state, &document, &client);

    let poll_window = state.config.poll_timeout();
    let deadline = tokio::time::Instant::now() + poll_window;

    loop {
        // Register for wakeups before looking, so an append racing the
        // check cannot be missed.
        let notified = lane.appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some((frames, next_offset)) = lane.read_from(offset).await {
            let mut headers = HeaderMap::new();
            let _ = headers.insert(NEXT_OFFSET_HEADER, next_offset.to_string().parse().unwrap());

            debug!(document_id = %document, client_id = %client, count = frames.len(), "stream read");

            return (
                StatusCode::OK,
                headers,
                encode_frame_batch(&frames).to_vec(),
            )
                .into_response();
        }

        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            // Poll window elapsed with nothing new; tell the client to
            // advance its cursor and come back.
            let mut headers = HeaderMap::new();
            let cursor = if query.cursor.is_empty() { "0" } else { &query.cursor };
            let cursor = HeaderValue::from_str(cursor)
                .unwrap_or_else(|_| HeaderValue::from_static("0"));
            let _ = headers.insert(CURSOR_HEADER, cursor);

            return (StatusCode::NO_CONTENT, headers).into_response();
        }
    }
}

/// `POST /in/:document/:client` — append a batch of frames; replies land on
/// the client's out-lane.
pub(crate) async fn handle_write(
    State(state): State<Arc<RelayState>>,
    Path((document, client)): Path<(String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    let document = DocumentId::from(document);

    let frames = match decode_frame_batch(&body) {
        Ok(frames) => frames,
        Err(error) => {
            warn!(document_id = %document, client_id = %client, %error, "rejecting undecodable batch");

            return (StatusCode::BAD_REQUEST, "invalid batch").into_response();
        }
    };

    let lane = state.stream_lanes.lane(&state, &document, &client);

    for frame in &frames {
        for reply in process_frame(&state, frame).await {
            lane.append(reply.encode()).await;
        }
    }

    StatusCode::OK.into_response()
}
