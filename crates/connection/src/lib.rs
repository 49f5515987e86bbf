//! Client-side transport core.
//!
//! One [`Connection`] manages one logical link to a relay: a reconnecting
//! state machine with exponential backoff, a FIFO buffer for messages sent
//! while offline, an in-flight tracker retired by ACKs, heartbeats, an
//! inactivity watchdog, and a transport selection policy that falls back
//! from the duplex websocket to the half-duplex SSE + POST pair.
//!
//! All mutable state lives in a single driver task; the handle only passes
//! commands to it. Interleaved calls to `connect`, `disconnect`, `send`, and
//! `destroy` are therefore safe by construction, and repeated `connect()`
//! calls while already connecting or connected are no-ops.

use thiserror::Error;

mod backoff;
mod connection;
mod events;
mod inflight;
mod options;
mod state;
pub mod transport;

pub use connection::Connection;
pub use events::{ConnectionEvent, Subscription};
pub use inflight::InFlightEntry;
pub use options::ConnectionOptions;
pub use state::ConnectionState;
pub use transport::{
    DurableStreamTransport, EventSourceTransport, Transport, TransportConn, TransportError,
    TransportKind, WebsocketTransport,
};

/// Errors surfaced to callers of the handle. Everything transport-level is
/// recovered internally by the state machine and never escapes through
/// `send`.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The connection was destroyed; the object is permanently unusable.
    #[error("connection has been destroyed")]
    Destroyed,
}
