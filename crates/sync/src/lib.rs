//! Sync-step formulation for both ordering modes.
//!
//! Step 1 advertises state, step 2 delivers the difference. How "state" is
//! summarized depends on who orders writes:
//!
//! - [`snapshot`] — the server is authoritative: a document is a snapshot id
//!   plus the server version reached on top of it.
//! - [`lamport`] — peer-to-peer exchange with no central authority: state is
//!   a per-client max-counter vector over content-addressed messages.
//!
//! The surrounding system agrees per document on which mode applies; nothing
//! here auto-detects it.

use thiserror::Error;
use veil_codec::CodecError;

pub mod lamport;
pub mod snapshot;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    /// The inbound advertisement did not decode.
    #[error(transparent)]
    InvalidFrame(#[from] CodecError),
}
