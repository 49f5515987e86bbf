//! Transport seam: anything that can carry opaque binary frames.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod event_source;
mod stream;
mod websocket;

pub use event_source::EventSourceTransport;
pub use stream::DurableStreamTransport;
pub use websocket::WebsocketTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Full-duplex websocket; one binary frame per message.
    Websocket,
    /// Half-duplex fallback: POSTed frames out, server-sent events in.
    EventSource,
    /// Long-polled append-only remote streams.
    DurableStream,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connect attempt timed out")]
    Timeout,

    #[error("transport i/o failure: {0}")]
    Io(String),

    #[error("unexpected http status {0}")]
    Status(u16),

    #[error("send raced transport loss")]
    NotConnected,

    #[error("no transport could be established")]
    Exhausted,
}

/// A live transport instance.
///
/// Concrete transports bridge their I/O onto a pair of channels and a
/// cancellation token; dropping (or closing) the connection tears both
/// directions down. Exactly one of these is live per [`crate::Connection`]
/// at any moment.
#[derive(Debug)]
pub struct TransportConn {
    kind: TransportKind,
    outbound: mpsc::UnboundedSender<Bytes>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
}

impl TransportConn {
    #[must_use]
    pub fn new(
        kind: TransportKind,
        outbound: mpsc::UnboundedSender<Bytes>,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            kind,
            outbound,
            inbound,
            shutdown,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Hands a frame to the I/O task. Fails synchronously when the transport
    /// already went away.
    pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::NotConnected)
    }

    /// The next inbound frame; `None` when the transport closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TransportConn {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A way of establishing [`TransportConn`]s.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn kind(&self) -> TransportKind;

    /// Establishes a live connection. Resolving is the success signal; the
    /// caller bounds the wait and destroys losers of the selection race.
    async fn connect(&self) -> Result<TransportConn, TransportError>;
}
