//! Lamport-mode sync: peers reconcile without a central authority.
//!
//! Peers layer their updates on a shared epoch snapshot and summarize what
//! they hold as a per-client max-counter vector. The summary is lossy — a
//! remote gap below the advertised maximum is invisible — which is the
//! accepted trade for a vector that is one integer per client.

use bytes::Bytes;
use tracing::debug;
use veil_codec::lamport::decode_state_vector;
use veil_codec::{SyncStep2Frame, UpdateRecord};
use veil_primitives::{LamportStateVector, MessageId, SeenMessages, SnapshotId};
use veil_reconcile::compute_set_difference_from_state_vector;

use crate::SyncError;

/// Summarizes an exact view into the lossy max-counter vector.
#[must_use]
pub fn decoded_state_vector(seen: &SeenMessages) -> LamportStateVector {
    seen.iter()
        .filter_map(|(&client, counters)| {
            counters.keys().next_back().map(|&max| (client, max))
        })
        .collect()
}

/// Assembles a sync-step-2 frame answering `remote`'s advertisement.
///
/// `fetch` resolves a content address to its ciphertext; `None` means the
/// payload was garbage-collected locally, which is not an error — the entry
/// is omitted and the peer will obtain it elsewhere. Updates are emitted in
/// ascending `(client, counter)` order, stamped on the shared `epoch`
/// snapshot, with no server version (nothing here is server-ordered).
#[must_use]
pub fn make_sync_step2(
    seen: &SeenMessages,
    epoch: &SnapshotId,
    remote: &LamportStateVector,
    mut fetch: impl FnMut(&MessageId) -> Option<Bytes>,
) -> SyncStep2Frame {
    let diff = compute_set_difference_from_state_vector(seen, remote);

    let mut updates = Vec::with_capacity(diff.len());
    let mut collected = 0_usize;

    for entry in diff {
        let Some(payload) = fetch(&entry.message_id) else {
            collected += 1;
            continue;
        };

        updates.push(UpdateRecord {
            snapshot_id: epoch.clone(),
            client: entry.client,
            counter: entry.counter,
            server_version: None,
            payload,
        });
    }

    if collected > 0 {
        debug!(collected, "omitted locally collected payloads from sync step 2");
    }

    SyncStep2Frame {
        snapshot: None,
        updates,
    }
}

/// As [`make_sync_step2`], decoding the remote vector off the wire first.
pub fn make_sync_step2_from_encoded(
    seen: &SeenMessages,
    epoch: &SnapshotId,
    remote: &[u8],
    fetch: impl FnMut(&MessageId) -> Option<Bytes>,
) -> Result<SyncStep2Frame, SyncError> {
    let remote = decode_state_vector(remote)?;

    Ok(make_sync_step2(seen, epoch, &remote, fetch))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use veil_primitives::ClientId;

    use super::*;

    fn observe(
        seen: &mut SeenMessages,
        store: &mut HashMap<MessageId, Bytes>,
        client: u64,
        counter: u64,
        payload: &[u8],
    ) {
        let payload = Bytes::copy_from_slice(payload);
        let id = MessageId::of(&payload);

        let _ = seen
            .entry(ClientId(client))
            .or_insert_with(BTreeMap::new)
            .insert(counter, id.clone());
        let _ = store.insert(id, payload);
    }

    #[test]
    fn test_decoded_state_vector_takes_maxima() {
        let mut seen = SeenMessages::new();
        let mut store = HashMap::new();

        observe(&mut seen, &mut store, 1, 1, b"a");
        observe(&mut seen, &mut store, 1, 7, b"b");
        observe(&mut seen, &mut store, 3, 2, b"c");

        let vector = decoded_state_vector(&seen);

        assert_eq!(vector, [(ClientId(1), 7), (ClientId(3), 2)].into());
    }

    #[test]
    fn test_empty_clients_do_not_advertise() {
        let mut seen = SeenMessages::new();
        let _ = seen.insert(ClientId(2), BTreeMap::new());

        assert!(decoded_state_vector(&seen).is_empty());
    }

    #[test]
    fn test_collected_payloads_are_skipped() {
        let mut seen = SeenMessages::new();
        let mut store = HashMap::new();

        observe(&mut seen, &mut store, 1, 1, b"kept");
        observe(&mut seen, &mut store, 1, 2, b"collected");

        // Simulate local GC of the second payload.
        let _ = store.remove(&MessageId::of(b"collected"));

        let frame = make_sync_step2(
            &seen,
            &"epoch".into(),
            &LamportStateVector::new(),
            |id| store.get(id).cloned(),
        );

        assert_eq!(frame.updates.len(), 1);
        assert_eq!(frame.updates[0].counter, 1);
        assert_eq!(frame.updates[0].payload, Bytes::from_static(b"kept"));
        assert!(frame.updates[0].server_version.is_none());
    }

    #[test]
    fn test_bad_remote_vector_is_invalid_frame() {
        let seen = SeenMessages::new();

        assert!(matches!(
            make_sync_step2_from_encoded(&seen, &"epoch".into(), &[9, 9], |_| None),
            Err(SyncError::InvalidFrame(_))
        ));
    }
}
