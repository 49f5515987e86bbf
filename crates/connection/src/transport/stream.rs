//! Durable stream transport: long-polled append-only remote streams.
//!
//! Each client owns two streams under a shared prefix: it POSTs encoded
//! message arrays to `in/<prefix>/<client-id>` and long-polls
//! `out/<prefix>/<client-id>` with `cursor` and `offset` query parameters.
//! Responses advance the read position via the `Stream-Next-Offset` and
//! `Stream-Cursor` headers; a 204 means "nothing new, advance the cursor".

use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use veil_codec::{decode_frame_batch, encode_frame_batch};

use super::{Transport, TransportConn, TransportError, TransportKind};

const NEXT_OFFSET_HEADER: &str = "Stream-Next-Offset";
const CURSOR_HEADER: &str = "Stream-Cursor";

#[derive(Clone, Debug)]
pub struct DurableStreamTransport {
    read_url: Url,
    write_url: Url,
    client: Client,
}

/// Read position in the remote stream, advanced from response headers.
#[derive(Clone, Debug, Default)]
struct ReadPosition {
    offset: String,
    cursor: String,
}

impl ReadPosition {
    fn advance_from(&mut self, response: &Response) {
        for (header, slot) in [
            (NEXT_OFFSET_HEADER, &mut self.offset),
            (CURSOR_HEADER, &mut self.cursor),
        ] {
            if let Some(value) = response
                .headers()
                .get(header)
                .and_then(|value| value.to_str().ok())
            {
                *slot = value.to_owned();
            }
        }
    }
}

impl DurableStreamTransport {
    /// `prefix` scopes the stream pair; `client_id` names this client's
    /// lane within it.
    pub fn new(base_url: &Url, prefix: &str, client_id: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            read_url: base_url.join(&format!("out/{prefix}/{client_id}"))?,
            write_url: base_url.join(&format!("in/{prefix}/{client_id}"))?,
            client: Client::new(),
        })
    }

    async fn poll(&self, position: &ReadPosition) -> Result<Response, TransportError> {
        let response = self
            .client
            .get(self.read_url.clone())
            // Query keys in lexicographic order.
            .query(&[("cursor", &position.cursor), ("offset", &position.offset)])
            .send()
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;

        let status = response.status();

        if status != StatusCode::NO_CONTENT && !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for DurableStreamTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::DurableStream
    }

    async fn connect(&self) -> Result<TransportConn, TransportError> {
        let mut position = ReadPosition {
            offset: "0".to_owned(),
            cursor: String::new(),
        };

        // The priming poll is the success signal.
        let response = self.poll(&position).await?;
        position.advance_from(&response);

        let mut primed = Vec::new();

        if response.status() != StatusCode::NO_CONTENT {
            let body = response
                .bytes()
                .await
                .map_err(|err| TransportError::Io(err.to_string()))?;

            primed = decode_frame_batch(&body)
                .map_err(|err| TransportError::Io(err.to_string()))?;
        }

        debug!(read_url = %self.read_url, "durable stream established");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();
        let shutdown = CancellationToken::new();

        for frame in primed {
            let _ = in_tx.send(frame);
        }

        let reader = self.clone();
        let reader_shutdown = shutdown.clone();
        drop(tokio::spawn(async move {
            loop {
                let response = tokio::select! {
                    () = reader_shutdown.cancelled() => break,
                    response = reader.poll(&position) => response,
                };

                let response = match response {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(error = %err, "stream poll failed");
                        break;
                    }
                };

                position.advance_from(&response);

                if response.status() == StatusCode::NO_CONTENT {
                    continue;
                }

                let Ok(body) = response.bytes().await else { break };

                let frames = match decode_frame_batch(&body) {
                    Ok(frames) => frames,
                    Err(err) => {
                        warn!(error = %err, "dropping undecodable stream body");
                        continue;
                    }
                };

                for frame in frames {
                    if in_tx.send(frame).is_err() {
                        break;
                    }
                }
            }

            reader_shutdown.cancel();
        }));

        let writer = self.clone();
        let writer_shutdown = shutdown.clone();
        drop(tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    () = writer_shutdown.cancelled() => break,
                    frame = out_rx.recv() => frame,
                };

                let Some(frame) = frame else { break };

                let mut frames = vec![frame];
                while let Ok(extra) = out_rx.try_recv() {
                    frames.push(extra);
                }

                let body = encode_frame_batch(&frames);

                let sent = writer
                    .client
                    .post(writer.write_url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(body.to_vec())
                    .send()
                    .await;

                match sent {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        warn!(status = %response.status(), "stream write rejected");
                        writer_shutdown.cancel();
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "stream write failed");
                        writer_shutdown.cancel();
                        break;
                    }
                }
            }
        }));

        Ok(TransportConn::new(
            TransportKind::DurableStream,
            out_tx,
            in_rx,
            shutdown,
        ))
    }
}
