//! Duplex websocket surface.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use bytes::Bytes;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use veil_primitives::DocumentId;

use crate::dispatch::process_frame;
use crate::RelayState;

pub(crate) async fn handle_upgrade(
    State(state): State<Arc<RelayState>>,
    Path(document): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let document = DocumentId::from(document);

    upgrade.on_upgrade(move |socket| serve_socket(state, document, socket))
}

async fn serve_socket(state: Arc<RelayState>, document: DocumentId, mut socket: WebSocket) {
    let client_id = state.allocate_client_id();
    let mut broadcasts = state.hub.subscribe(&document);

    info!(client_id, document_id = %document, "websocket client connected");

    loop {
        tokio::select! {
            frame = broadcasts.recv() => match frame {
                Ok(frame) => {
                    if socket.send(WsMessage::Binary(frame.to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(client_id, skipped, "subscriber lagged; frames lost");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = socket.recv() => {
                let frame = match inbound {
                    Some(Ok(WsMessage::Binary(frame))) => Bytes::from(frame),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        debug!(client_id, %error, "websocket read failed");
                        break;
                    }
                };

                for reply in process_frame(&state, &frame).await {
                    if socket.send(WsMessage::Binary(reply.encode().to_vec())).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    info!(client_id, document_id = %document, "websocket client disconnected");
}
