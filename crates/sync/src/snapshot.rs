//! Snapshot-mode sync: the server orders writes.

use bytes::Bytes;
use veil_codec::{SnapshotFrame, StateVector, SyncStep2Frame, UpdateRecord};
use veil_primitives::SnapshotId;

use crate::SyncError;

/// Encodes the advertisement "I have snapshot S at server version V".
#[must_use]
pub fn make_state_vector(snapshot_id: Option<SnapshotId>, server_version: u64) -> Bytes {
    StateVector::new(snapshot_id, server_version).encode()
}

/// Assembles the missing content: optionally a full snapshot, then the
/// updates layered on it in log order.
#[must_use]
pub fn make_sync_step2(
    updates: Vec<UpdateRecord>,
    snapshot: Option<SnapshotFrame>,
) -> SyncStep2Frame {
    SyncStep2Frame { snapshot, updates }
}

/// Decodes an inbound advertisement.
pub fn read_state_vector(bytes: &[u8]) -> Result<StateVector, SyncError> {
    Ok(StateVector::decode(bytes)?)
}
