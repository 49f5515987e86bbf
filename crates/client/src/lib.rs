//! Client-side document sessions.
//!
//! A [`DocumentSession`] is the piece that ties the sync protocol to a
//! transport: it advertises local state whenever the connection comes up,
//! applies the answering snapshot and updates, stamps outgoing updates with
//! the client's Lamport counters, and re-synchronizes transparently across
//! reconnects. The ciphertext itself stays opaque — whoever owns the keys
//! subscribes to the session's events and does the merging.

use thiserror::Error;

mod session;

pub use session::{DocumentSession, SessionEvent, SessionState, SessionSubscription};

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// The session task is gone (detached, or its connection destroyed).
    #[error("document session is detached")]
    Detached,
}
