//! Bit-exact wire formats for the Veil sync protocol.
//!
//! All integers are LEB128 variable-length unsigned; strings are
//! length-prefixed UTF-8; byte arrays are length-prefixed raw bytes. Every
//! frame starts with a protocol version, currently 0. Decoding is strict:
//! an unknown version or discriminant, a truncated varuint, or a length that
//! reads past the end of the buffer all fail with [`CodecError::InvalidFrame`].
//!
//! Message identifiers are never part of any frame; a receiver derives them
//! from the bytes it already has (see `veil_primitives::MessageId`).

use thiserror::Error;

pub mod lamport;
pub mod message;
pub mod state_vector;
pub mod sync_step2;
pub mod update;
pub mod varint;

pub use message::{
    decode_batch, decode_frame_batch, encode_batch, encode_frame_batch, DocMessage, Message,
    ResponseStatus,
};
pub use state_vector::StateVector;
pub use sync_step2::SyncStep2Frame;
pub use update::{SnapshotFrame, UpdateFrame, UpdateRecord};

/// Wire protocol version emitted and accepted by this crate.
pub const PROTOCOL_VERSION: u64 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
}

impl CodecError {
    pub(crate) const TRUNCATED: Self = Self::InvalidFrame("frame truncated");
}

pub(crate) fn check_version(version: u64) -> Result<(), CodecError> {
    if version != PROTOCOL_VERSION {
        return Err(CodecError::InvalidFrame("unsupported protocol version"));
    }
    Ok(())
}
