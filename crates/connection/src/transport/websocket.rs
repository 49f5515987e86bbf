//! The preferred duplex transport.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use veil_codec::Message;

use super::{Transport, TransportConn, TransportError, TransportKind};

/// One binary websocket message per protocol frame.
#[derive(Clone, Debug)]
pub struct WebsocketTransport {
    url: Url,
}

impl WebsocketTransport {
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Transport for WebsocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn connect(&self) -> Result<TransportConn, TransportError> {
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;

        debug!(url = %self.url, "websocket established");

        let (mut sink, mut source) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        drop(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_shutdown.cancelled() => break,
                    frame = out_rx.recv() => {
                        let Some(frame) = frame else { break };

                        if sink.send(WsMessage::Binary(frame.to_vec())).await.is_err() {
                            writer_shutdown.cancel();
                            break;
                        }
                    }
                }
            }

            let _ = sink.close().await;
        }));

        let reader_shutdown = shutdown.clone();
        drop(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader_shutdown.cancelled() => break,
                    message = source.next() => {
                        match message {
                            Some(Ok(WsMessage::Binary(frame))) => {
                                if in_tx.send(Bytes::from(frame)).is_err() {
                                    break;
                                }
                            }
                            // Control pings still prove the peer is alive;
                            // surface them as protocol pings.
                            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                                if in_tx.send(Message::Ping.encode()).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                debug!(error = %err, "websocket read failed");
                                break;
                            }
                        }
                    }
                }
            }

            // Dropping in_tx tells the driver the transport is gone.
            reader_shutdown.cancel();
        }));

        Ok(TransportConn::new(
            TransportKind::Websocket,
            out_tx,
            in_rx,
            shutdown,
        ))
    }
}
