//! Half-duplex surface: server-sent events down, POSTed batches up.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use veil_codec::{decode_frame_batch, encode_frame_batch};
use veil_primitives::DocumentId;

use crate::dispatch::process_frame;
use crate::RelayState;

/// The event stream: a `client-id` event first, then `message` events
/// carrying base64 frames, with periodic `ping` events in between.
pub(crate) async fn handle_events(
    State(state): State<Arc<RelayState>>,
    Path(document): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let document = DocumentId::from(document);
    let client_id = state.allocate_client_id();
    let mut broadcasts = state.hub.subscribe(&document);
    let ping_interval = state.config.ping_interval();

    info!(client_id, document_id = %document, "event stream client connected");

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().event("client-id").data(client_id.to_string()));

        let mut ping = tokio::time::interval(ping_interval);
        // The first tick is immediate; skip it so pings are periodic.
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = broadcasts.recv() => match frame {
                    Ok(frame) => {
                        yield Ok(Event::default().event("message").data(STANDARD.encode(&frame)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(client_id, skipped, "subscriber lagged; frames lost");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = ping.tick() => {
                    yield Ok(Event::default().event("ping").data(""));
                }
            }
        }
    };

    Sse::new(stream)
}

/// Accepts one POSTed batch of envelopes and answers with the batch of
/// replies (ACKs, sync responses).
pub(crate) async fn handle_post(
    State(state): State<Arc<RelayState>>,
    Path(document): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let document = DocumentId::from(document);

    let frames = match decode_frame_batch(&body) {
        Ok(frames) => frames,
        Err(error) => {
            warn!(document_id = %document, %error, "rejecting undecodable batch");

            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": error.to_string() }).to_string(),
            )
                .into_response();
        }
    };

    debug!(document_id = %document, frames = frames.len(), "processing posted batch");

    let mut replies = Vec::new();

    for frame in &frames {
        for reply in process_frame(&state, frame).await {
            replies.push(reply.encode());
        }
    }

    encode_frame_batch(&replies).to_vec().into_response()
}
