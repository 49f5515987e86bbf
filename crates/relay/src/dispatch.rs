//! The shared dispatch path: one inbound frame in, replies out, broadcasts
//! to the side.

use bytes::Bytes;
use tracing::{debug, warn};
use veil_codec::{DocMessage, Message, ResponseStatus, UpdateFrame};
use veil_primitives::MessageId;

use crate::RelayState;

/// Processes one raw envelope from a client.
///
/// Returns the replies owed to the sender, in order. Anything the store
/// accepted is additionally published to the document's subscribers. Every
/// trackable inbound message is acknowledged by the content address of the
/// frame exactly as it arrived.
pub(crate) async fn process_frame(state: &RelayState, frame: &Bytes) -> Vec<Message> {
    let message = match Message::decode(frame) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "dropping undecodable frame");
            return Vec::new();
        }
    };

    let mut replies = Vec::new();

    if message.is_trackable() {
        replies.push(Message::Ack {
            message_id: MessageId::of(frame),
        });
    }

    match message {
        Message::Document { document, body } => match body {
            DocMessage::SyncStep1(vector) => {
                match state.store.handle_sync_step1(&document, &vector).await {
                    Ok(response) => {
                        replies.push(Message::Document {
                            document: document.clone(),
                            body: DocMessage::SyncStep2(response.sync_step2),
                        });
                        replies.push(Message::Document {
                            document,
                            body: DocMessage::SyncDone,
                        });
                    }
                    Err(error) => {
                        warn!(document_id = %document, %error, "sync step 1 rejected");
                        replies.clear();
                    }
                }
            }
            DocMessage::Update(update) => {
                match state
                    .store
                    .handle_encrypted_update(&document, &update.encode())
                    .await
                {
                    Ok(Some(stored)) => {
                        publish_update(state, &document, stored);
                    }
                    Ok(None) => debug!(document_id = %document, "update was a no-op"),
                    Err(error) => {
                        warn!(document_id = %document, %error, "update rejected");
                        replies.clear();
                    }
                }
            }
            DocMessage::SyncStep2(step2) => {
                match state
                    .store
                    .handle_encrypted_sync_step2(&document, &step2.encode())
                    .await
                {
                    Ok(stored) => {
                        for frame in stored {
                            publish_update(state, &document, frame);
                        }
                    }
                    Err(error) => {
                        warn!(document_id = %document, %error, "sync step 2 rejected");
                        replies.clear();
                    }
                }
            }
            DocMessage::SyncDone => {}
        },
        Message::Awareness { document, payload } => {
            // Ephemeral: fanned out, never stored.
            let reached = state.hub.publish(
                &document,
                Message::Awareness {
                    document: document.clone(),
                    payload,
                }
                .encode(),
            );

            debug!(document_id = %document, reached, "awareness relayed");
        }
        // Client-side concepts; nothing for the relay to do.
        Message::Ack { .. } => {}
        // Answered so the sender's liveness window refreshes.
        Message::Ping => replies.push(Message::Ping),
        // Opaque file payloads are acknowledged and otherwise ignored here;
        // chunk reassembly lives outside the relay.
        Message::File { .. } => {}
        Message::Request {
            request_id, method, ..
        } => {
            debug!(method = %method, request_id, "unhandled request method");

            replies.push(Message::Response {
                request_id,
                status: ResponseStatus::Error,
                payload: Bytes::from_static(b"unknown method"),
            });
        }
        Message::Response { .. } => {}
    }

    replies
}

fn publish_update(state: &RelayState, document: &veil_primitives::DocumentId, stored: Bytes) {
    let frame = match UpdateFrame::decode(&stored) {
        Ok(update) => Message::Document {
            document: document.clone(),
            body: DocMessage::Update(update),
        }
        .encode(),
        Err(error) => {
            warn!(%error, "stored payload failed to re-decode");
            return;
        }
    };

    let reached = state.hub.publish(document, frame);
    debug!(document_id = %document, reached, "stored update broadcast");
}
