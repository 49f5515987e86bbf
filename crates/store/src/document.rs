//! Per-document state: snapshot lineage and the append-only update log.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use bytes::Bytes;
use tracing::{debug, info};
use veil_codec::{SnapshotFrame, StateVector, SyncStep2Frame, UpdateRecord};
use veil_primitives::{ClientId, SnapshotId};

use crate::StoreError;

/// One snapshot with everything layered on it.
#[derive(Clone, Debug)]
pub struct SnapshotRecord {
    pub payload: Bytes,
    pub parent_id: Option<SnapshotId>,
    pub created_at: SystemTime,

    /// Highest accepted counter per client, within this snapshot.
    pub client_counters: BTreeMap<ClientId, u64>,

    /// Accepted updates in log order; `server_version` is always assigned,
    /// strictly increasing from 1.
    pub updates: Vec<UpdateRecord>,
}

impl SnapshotRecord {
    fn new(payload: Bytes, parent_id: Option<SnapshotId>) -> Self {
        Self {
            payload,
            parent_id,
            created_at: SystemTime::now(),
            client_counters: BTreeMap::new(),
            updates: Vec::new(),
        }
    }
}

/// What became of a submitted snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Adopted as the new active snapshot, at version 0.
    Adopted,
    /// A late null-parent duplicate arriving after the chain was
    /// established; discarded without touching the active chain.
    Skipped,
}

/// The authoritative record for one document.
#[derive(Clone, Debug, Default)]
pub struct DocumentRecord {
    snapshots: HashMap<SnapshotId, SnapshotRecord>,
    active_snapshot_id: Option<SnapshotId>,
    active_snapshot_version: u64,
}

impl DocumentRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn active_snapshot_id(&self) -> Option<&SnapshotId> {
        self.active_snapshot_id.as_ref()
    }

    #[must_use]
    pub const fn active_snapshot_version(&self) -> u64 {
        self.active_snapshot_version
    }

    #[must_use]
    pub fn snapshot(&self, id: &SnapshotId) -> Option<&SnapshotRecord> {
        self.snapshots.get(id)
    }

    /// The advertisement this document would make for itself.
    #[must_use]
    pub fn state_vector(&self) -> StateVector {
        StateVector::new(self.active_snapshot_id.clone(), self.active_snapshot_version)
    }

    /// Applies a submitted snapshot to the lineage.
    ///
    /// - no active snapshot: adopt it, version 0;
    /// - parent is the active snapshot: supersede, version 0;
    /// - parent is null after a chain exists: a late duplicate from a
    ///   concurrent initial sync — skip it, the chain stands;
    /// - anything else names the wrong parent and is rejected.
    pub fn apply_snapshot(&mut self, frame: SnapshotFrame) -> Result<SnapshotOutcome, StoreError> {
        let Some(active) = self.active_snapshot_id.clone() else {
            info!(snapshot_id = %frame.id, "adopting initial snapshot");

            let record = SnapshotRecord::new(frame.payload, frame.parent_id);
            let _ = self.snapshots.insert(frame.id.clone(), record);
            self.active_snapshot_id = Some(frame.id);
            self.active_snapshot_version = 0;

            return Ok(SnapshotOutcome::Adopted);
        };

        match frame.parent_id {
            Some(ref parent) if *parent == active => {
                info!(snapshot_id = %frame.id, parent_id = %parent, "superseding active snapshot");

                let record = SnapshotRecord::new(frame.payload, frame.parent_id);
                let _ = self.snapshots.insert(frame.id.clone(), record);
                self.active_snapshot_id = Some(frame.id);
                self.active_snapshot_version = 0;

                Ok(SnapshotOutcome::Adopted)
            }
            None => {
                debug!(snapshot_id = %frame.id, active = %active, "skipping late duplicate root snapshot");

                Ok(SnapshotOutcome::Skipped)
            }
            Some(parent) => Err(StoreError::SnapshotParentMismatch {
                submitted: frame.id,
                parent: Some(parent),
                active,
            }),
        }
    }

    /// Validates and appends a batch of updates, assigning server versions.
    ///
    /// The batch is a transaction: either every record is accepted and the
    /// stamped copies are returned in order, or nothing is applied.
    pub fn append_updates(
        &mut self,
        updates: Vec<UpdateRecord>,
    ) -> Result<Vec<UpdateRecord>, StoreError> {
        let active = self.active_snapshot_id.clone();

        // Validate the whole batch against a scratch view first.
        let mut scratch_counters: BTreeMap<ClientId, u64> = BTreeMap::new();

        for update in &updates {
            let Some(active) = active.as_ref().filter(|id| **id == update.snapshot_id) else {
                return Err(StoreError::SnapshotMismatch {
                    submitted: update.snapshot_id.clone(),
                    active,
                });
            };

            let accepted = scratch_counters.get(&update.client).copied().unwrap_or_else(|| {
                self.snapshots[active]
                    .client_counters
                    .get(&update.client)
                    .copied()
                    .unwrap_or(0)
            });

            if update.counter != accepted + 1 {
                return Err(StoreError::CounterOutOfOrder {
                    client: update.client,
                    submitted: update.counter,
                    accepted,
                });
            }

            let _ = scratch_counters.insert(update.client, update.counter);
        }

        let Some(active) = active else {
            return Ok(Vec::new());
        };

        let record = self
            .snapshots
            .get_mut(&active)
            .expect("active snapshot record must exist");

        let mut stamped = Vec::with_capacity(updates.len());

        for mut update in updates {
            self.active_snapshot_version += 1;
            update.server_version = Some(self.active_snapshot_version);

            let _ = record
                .client_counters
                .insert(update.client, update.counter);
            record.updates.push(update.clone());
            stamped.push(update);
        }

        debug!(
            accepted = stamped.len(),
            active_snapshot_version = self.active_snapshot_version,
            "appended updates"
        );

        Ok(stamped)
    }

    /// Answers a sync-step-1 advertisement.
    ///
    /// Matching snapshot: only the updates past the advertised version.
    /// Anything else (empty, unknown, superseded): the full active snapshot
    /// plus its entire log.
    #[must_use]
    pub fn answer_state_vector(&self, remote: &StateVector) -> SyncStep2Frame {
        let Some(active) = self.active_snapshot_id.as_ref() else {
            return SyncStep2Frame::default();
        };

        let record = &self.snapshots[active];

        if remote.snapshot_id.as_ref() == Some(active) {
            let updates = record
                .updates
                .iter()
                .filter(|u| u.server_version.is_some_and(|v| v > remote.server_version))
                .cloned()
                .collect();

            return SyncStep2Frame {
                snapshot: None,
                updates,
            };
        }

        SyncStep2Frame {
            snapshot: Some(SnapshotFrame {
                id: active.clone(),
                parent_id: record.parent_id.clone(),
                payload: record.payload.clone(),
            }),
            updates: record.updates.clone(),
        }
    }
}
