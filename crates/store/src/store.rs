//! The multi-document store and its frame-level entry points.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use veil_codec::{StateVector, SyncStep2Frame, UpdateFrame};
use veil_primitives::{DocumentId, SnapshotId};

use crate::document::{DocumentRecord, SnapshotOutcome};
use crate::StoreError;

/// Answer to a sync-step-1 advertisement: the missing content plus the
/// server's own state vector `(active snapshot, active version)`.
#[derive(Clone, Debug)]
pub struct SyncStep1Response {
    pub sync_step2: SyncStep2Frame,
    pub state_vector: StateVector,
}

/// Server-side authority over every document it hosts.
///
/// Each document is guarded by its own async mutex; every entry point —
/// readers included — runs inside that document's critical section, so a
/// caller always observes a consistent `(active snapshot, version, log)`
/// triple. Documents never contend with each other.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: DashMap<DocumentId, Arc<Mutex<DocumentRecord>>>,
}

impl DocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &DocumentId) -> Arc<Mutex<DocumentRecord>> {
        let entry = self
            .documents
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(DocumentRecord::new())));

        Arc::clone(entry.value())
    }

    #[must_use]
    pub fn contains(&self, key: &DocumentId) -> bool {
        self.documents.contains_key(key)
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Stores a submitted update frame.
    ///
    /// Returns the re-encoded frame with assigned server versions for the
    /// caller to broadcast, or `None` when the frame was a no-op (a skipped
    /// late duplicate snapshot, or an empty update list).
    pub async fn handle_encrypted_update(
        &self,
        key: &DocumentId,
        frame: &[u8],
    ) -> Result<Option<Bytes>, StoreError> {
        let frame = UpdateFrame::decode(frame)?;

        let entry = self.entry(key);
        let mut document = entry.lock().await;

        match frame {
            UpdateFrame::Snapshot(snapshot) => {
                match document.apply_snapshot(snapshot.clone())? {
                    SnapshotOutcome::Adopted => {
                        Ok(Some(UpdateFrame::Snapshot(snapshot).encode()))
                    }
                    SnapshotOutcome::Skipped => {
                        warn!(document_id = %key, snapshot_id = %snapshot.id, "discarded late duplicate snapshot");

                        Ok(None)
                    }
                }
            }
            UpdateFrame::Updates(updates) => {
                if updates.is_empty() {
                    return Ok(None);
                }

                let stamped = document.append_updates(updates)?;

                Ok(Some(UpdateFrame::Updates(stamped).encode()))
            }
        }
    }

    /// Answers a sync-step-1 advertisement for `key`.
    ///
    /// An unknown document yields an empty sync-step-2 and an empty state
    /// vector; it is not created.
    pub async fn handle_sync_step1(
        &self,
        key: &DocumentId,
        state_vector: &[u8],
    ) -> Result<SyncStep1Response, StoreError> {
        let remote = StateVector::decode(state_vector)?;

        let Some(entry) = self.documents.get(key).map(|entry| Arc::clone(entry.value())) else {
            debug!(document_id = %key, "sync step 1 for unknown document");

            return Ok(SyncStep1Response {
                sync_step2: SyncStep2Frame::default(),
                state_vector: StateVector::empty(),
            });
        };

        let document = entry.lock().await;

        Ok(SyncStep1Response {
            sync_step2: document.answer_state_vector(&remote),
            state_vector: document.state_vector(),
        })
    }

    /// Applies an inbound sync-step-2 frame: the snapshot first (if any),
    /// then each update in order. Returns the re-encoded payloads that were
    /// actually stored, for broadcast.
    pub async fn handle_encrypted_sync_step2(
        &self,
        key: &DocumentId,
        frame: &[u8],
    ) -> Result<Vec<Bytes>, StoreError> {
        let frame = SyncStep2Frame::decode(frame)?;

        let entry = self.entry(key);
        let mut document = entry.lock().await;

        let mut stored = Vec::new();

        if let Some(snapshot) = frame.snapshot {
            match document.apply_snapshot(snapshot.clone())? {
                SnapshotOutcome::Adopted => {
                    stored.push(UpdateFrame::Snapshot(snapshot).encode());
                }
                SnapshotOutcome::Skipped => {
                    warn!(document_id = %key, snapshot_id = %snapshot.id, "discarded late duplicate snapshot");
                }
            }
        }

        if !frame.updates.is_empty() {
            let stamped = document.append_updates(frame.updates)?;
            stored.push(UpdateFrame::Updates(stamped).encode());
        }

        Ok(stored)
    }

    /// A consistent copy of the document's record, if it exists.
    pub async fn get_document(&self, key: &DocumentId) -> Option<DocumentRecord> {
        let entry = self.documents.get(key).map(|entry| Arc::clone(entry.value()))?;
        let document = entry.lock().await;

        Some(document.clone())
    }

    /// The stored blob of one snapshot of `key`, if present.
    pub async fn fetch_snapshot(&self, key: &DocumentId, id: &SnapshotId) -> Option<Bytes> {
        let entry = self.documents.get(key).map(|entry| Arc::clone(entry.value()))?;
        let document = entry.lock().await;

        document.snapshot(id).map(|record| record.payload.clone())
    }
}
