//! Server-side storage authority for encrypted documents.
//!
//! The store never sees plaintext. Per document it tracks a chain of opaque
//! snapshots and, under the active snapshot, an append-only log of opaque
//! updates. It assigns the server versions that give snapshot-mode sync its
//! total order, and enforces the two write invariants:
//!
//! - an update must target the active snapshot;
//! - per client within a snapshot, counters advance by exactly one.
//!
//! All entry points for one document serialize on that document's lock;
//! operations on different documents proceed independently.

use thiserror::Error;
use veil_codec::CodecError;
use veil_primitives::{ClientId, SnapshotId};

mod document;
mod store;

pub use document::{DocumentRecord, SnapshotOutcome, SnapshotRecord};
pub use store::{DocumentStore, SyncStep1Response};

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// The submitted frame did not decode.
    #[error(transparent)]
    InvalidFrame(#[from] CodecError),

    /// An update referenced a snapshot other than the active one.
    #[error("update targets snapshot {submitted} but the active snapshot is {active:?}")]
    SnapshotMismatch {
        submitted: SnapshotId,
        active: Option<SnapshotId>,
    },

    /// A child snapshot named a parent that is not the active snapshot.
    #[error("snapshot {submitted} names parent {parent:?} but the active snapshot is {active}")]
    SnapshotParentMismatch {
        submitted: SnapshotId,
        parent: Option<SnapshotId>,
        active: SnapshotId,
    },

    /// A client skipped or repeated a counter within the active snapshot.
    #[error("client {client} submitted counter {submitted} after {accepted}")]
    CounterOutOfOrder {
        client: ClientId,
        submitted: u64,
        accepted: u64,
    },
}
