//! Half-duplex fallback: POSTed frames out, server-sent events in.
//!
//! The event stream opens first; its initial `client-id` event is the
//! success signal and names this client for subsequent POSTs. `message`
//! events carry base64-encoded envelopes; `ping` events carry nothing but
//! prove the channel is alive.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use veil_codec::{decode_frame_batch, encode_frame_batch, Message};

use super::{Transport, TransportConn, TransportError, TransportKind};

#[derive(Clone, Debug)]
pub struct EventSourceTransport {
    events_url: Url,
    post_url: Url,
    client: Client,
}

impl EventSourceTransport {
    #[must_use]
    pub fn new(events_url: Url, post_url: Url) -> Self {
        Self {
            events_url,
            post_url,
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for EventSourceTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::EventSource
    }

    async fn connect(&self) -> Result<TransportConn, TransportError> {
        let response = self
            .client
            .get(self.events_url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let mut source = response.bytes_stream();
        let mut parser = SseParser::default();

        // The first event must name this client; that is the success signal.
        // Anything sharing its chunk is carried over to the reader.
        let mut pending = Vec::new();

        let client_id = loop {
            let chunk = source
                .next()
                .await
                .ok_or_else(|| TransportError::Io("event stream ended before client id".into()))?
                .map_err(|err| TransportError::Io(err.to_string()))?;

            let mut events = parser.push(&chunk).into_iter();

            match events.next() {
                None => continue,
                Some(event) if event.name == "client-id" => {
                    pending.extend(events);
                    break event.data;
                }
                Some(event) => {
                    return Err(TransportError::Io(format!(
                        "expected client-id event, got {}",
                        event.name
                    )));
                }
            }
        };

        debug!(client_id = %client_id, "event source established");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();
        let shutdown = CancellationToken::new();

        let writer_in_tx = in_tx.clone();
        let reader_shutdown = shutdown.clone();
        drop(tokio::spawn(async move {
            for event in pending {
                if let Some(frame) = event_frame(&event) {
                    if in_tx.send(frame).is_err() {
                        return;
                    }
                }
            }

            'outer: loop {
                tokio::select! {
                    () = reader_shutdown.cancelled() => break,
                    chunk = source.next() => {
                        let Some(Ok(chunk)) = chunk else { break };

                        for event in parser.push(&chunk) {
                            let Some(frame) = event_frame(&event) else {
                                continue;
                            };

                            if in_tx.send(frame).is_err() {
                                break 'outer;
                            }
                        }
                    }
                }
            }

            reader_shutdown.cancel();
        }));

        let writer_shutdown = shutdown.clone();
        let client = self.client.clone();
        let mut post_url = self.post_url.clone();
        let _ = post_url
            .query_pairs_mut()
            .append_pair("client_id", &client_id);

        drop(tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    () = writer_shutdown.cancelled() => break,
                    frame = out_rx.recv() => frame,
                };

                let Some(frame) = frame else { break };

                // Opportunistically batch whatever else is already queued.
                let mut frames = vec![frame];
                while let Ok(extra) = out_rx.try_recv() {
                    frames.push(extra);
                }

                let body = encode_frame_batch(&frames);

                let sent = client
                    .post(post_url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(body.to_vec())
                    .send()
                    .await;

                match sent {
                    Ok(response) if response.status().is_success() => {
                        // The reply batch (ACKs, sync responses) rides the
                        // POST response on this half-duplex stack.
                        let Ok(body) = response.bytes().await else {
                            writer_shutdown.cancel();
                            break;
                        };

                        match decode_frame_batch(&body) {
                            Ok(replies) => {
                                for reply in replies {
                                    if writer_in_tx.send(reply).is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "dropping undecodable post reply");
                            }
                        }
                    }
                    Ok(response) => {
                        warn!(status = %response.status(), "frame post rejected");
                        writer_shutdown.cancel();
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "frame post failed");
                        writer_shutdown.cancel();
                        break;
                    }
                }
            }
        }));

        Ok(TransportConn::new(
            TransportKind::EventSource,
            out_tx,
            in_rx,
            shutdown,
        ))
    }
}

/// The inbound frame an event stands for, if any.
fn event_frame(event: &SseEvent) -> Option<Bytes> {
    match event.name.as_str() {
        "message" => match STANDARD.decode(event.data.trim()) {
            Ok(frame) => Some(Bytes::from(frame)),
            Err(err) => {
                warn!(error = %err, "dropping undecodable event payload");
                None
            }
        },
        "ping" => Some(Message::Ping.encode()),
        other => {
            debug!(event = other, "ignoring unknown event");
            None
        }
    }
}

/// One parsed server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub name: String,
    pub data: String,
}

/// Incremental line-oriented SSE parser.
///
/// Collects `event:` and `data:` fields and dispatches on the blank line;
/// comments and unknown fields are skipped.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: BytesMut,
    name: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.split_to(line_end + 1);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else if let Some(name) = line.strip_prefix("event:") {
                self.name = Some(name.trim_start().to_owned());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.trim_start().to_owned());
            }
            // Comments (leading ':') and other fields are ignored.
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let name = self.name.take().unwrap_or_else(|| "message".to_owned());
        let data = std::mem::take(&mut self.data);

        if data.is_empty() && name == "message" {
            return None;
        }

        Some(SseEvent {
            name,
            data: data.join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_named_events() {
        let mut parser = SseParser::default();

        let events = parser.push(b"event: client-id\ndata: 42\n\n");

        assert_eq!(
            events,
            vec![SseEvent {
                name: "client-id".into(),
                data: "42".into(),
            }]
        );
    }

    #[test]
    fn test_reassembles_split_chunks() {
        let mut parser = SseParser::default();

        assert!(parser.push(b"event: mess").is_empty());
        assert!(parser.push(b"age\ndata: aGk=\n").is_empty());

        let events = parser.push(b"\n");

        assert_eq!(events[0].name, "message");
        assert_eq!(events[0].data, "aGk=");
    }

    #[test]
    fn test_joins_multiline_data() {
        let mut parser = SseParser::default();

        let events = parser.push(b"data: a\ndata: b\n\n");

        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn test_skips_comments_and_empty_pings() {
        let mut parser = SseParser::default();

        assert!(parser.push(b": keep-alive\n\n").is_empty());

        let events = parser.push(b"event: ping\n\n");
        assert_eq!(events[0].name, "ping");
        assert_eq!(events[0].data, "");
    }
}
