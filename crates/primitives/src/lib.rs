//! Shared primitive types for the Veil collaboration core.
//!
//! Everything here is independent of wire formats, transports, and storage:
//! identifiers, Lamport timestamps, and the content-addressing scheme used
//! for message identifiers.

pub mod document;
pub mod message;
pub mod seen;
pub mod snapshot;
pub mod timestamp;

pub use document::DocumentId;
pub use message::MessageId;
pub use seen::{CounterRange, LamportStateVector, SeenMessages, SeenRanges};
pub use snapshot::SnapshotId;
pub use timestamp::{ClientId, LamportTimestamp};
