//! Frame-level lifecycle tests for the document store.

use std::sync::Arc;

use bytes::Bytes;
use veil_codec::{SnapshotFrame, StateVector, UpdateFrame, UpdateRecord};
use veil_primitives::{ClientId, DocumentId};
use veil_store::{DocumentStore, StoreError};

fn doc() -> DocumentId {
    DocumentId::from("doc-1")
}

fn snapshot_frame(id: &str, parent: Option<&str>, payload: &[u8]) -> Bytes {
    UpdateFrame::Snapshot(SnapshotFrame {
        id: id.into(),
        parent_id: parent.map(Into::into),
        payload: Bytes::copy_from_slice(payload),
    })
    .encode()
}

fn update_frame(snapshot_id: &str, client: u64, counter: u64, payload: &[u8]) -> Bytes {
    UpdateFrame::Updates(vec![UpdateRecord {
        snapshot_id: snapshot_id.into(),
        client: ClientId(client),
        counter,
        server_version: None,
        payload: Bytes::copy_from_slice(payload),
    }])
    .encode()
}

#[tokio::test]
async fn test_snapshot_lifecycle_over_frames() {
    let store = DocumentStore::new();

    // Adopt the root snapshot.
    let stored = store
        .handle_encrypted_update(&doc(), &snapshot_frame("S0", None, &[9]))
        .await
        .unwrap()
        .expect("adopted snapshot is echoed");
    assert!(matches!(
        UpdateFrame::decode(&stored).unwrap(),
        UpdateFrame::Snapshot(_)
    ));

    // First update gets server version 1.
    let stored = store
        .handle_encrypted_update(&doc(), &update_frame("S0", 1, 1, &[1]))
        .await
        .unwrap()
        .expect("accepted update is echoed");

    let UpdateFrame::Updates(updates) = UpdateFrame::decode(&stored).unwrap() else {
        panic!("expected update echo");
    };
    assert_eq!(updates[0].server_version, Some(1));

    // A counter gap is rejected.
    assert!(matches!(
        store
            .handle_encrypted_update(&doc(), &update_frame("S0", 1, 3, &[3]))
            .await,
        Err(StoreError::CounterOutOfOrder { .. })
    ));

    // An update for a non-active snapshot is rejected.
    assert!(matches!(
        store
            .handle_encrypted_update(&doc(), &update_frame("other", 1, 2, &[2]))
            .await,
        Err(StoreError::SnapshotMismatch { .. })
    ));

    // A child supersedes; a late duplicate root is silently dropped.
    assert!(store
        .handle_encrypted_update(&doc(), &snapshot_frame("S1", Some("S0"), &[8]))
        .await
        .unwrap()
        .is_some());
    assert!(store
        .handle_encrypted_update(&doc(), &snapshot_frame("S0-late", None, &[7]))
        .await
        .unwrap()
        .is_none());

    let record = store.get_document(&doc()).await.unwrap();
    assert_eq!(record.active_snapshot_id(), Some(&"S1".into()));
    assert_eq!(record.active_snapshot_version(), 0);
}

#[tokio::test]
async fn test_sync_step1_unknown_document() {
    let store = DocumentStore::new();

    let response = store
        .handle_sync_step1(&doc(), &StateVector::empty().encode())
        .await
        .unwrap();

    assert!(response.sync_step2.is_empty());
    assert_eq!(response.state_vector, StateVector::empty());
    assert!(!store.contains(&doc()));
}

#[tokio::test]
async fn test_sync_step1_matching_snapshot_older_version() {
    let store = DocumentStore::new();

    let _ = store
        .handle_encrypted_update(&doc(), &snapshot_frame("S0", None, &[9]))
        .await
        .unwrap();

    for counter in 1..=5 {
        let _ = store
            .handle_encrypted_update(&doc(), &update_frame("S0", 1, counter, &[counter as u8]))
            .await
            .unwrap();
    }

    let response = store
        .handle_sync_step1(&doc(), &StateVector::new(Some("S0".into()), 2).encode())
        .await
        .unwrap();

    assert!(response.sync_step2.snapshot.is_none());
    assert_eq!(
        response
            .sync_step2
            .updates
            .iter()
            .map(|u| u.server_version)
            .collect::<Vec<_>>(),
        vec![Some(3), Some(4), Some(5)]
    );
    assert_eq!(
        response.state_vector,
        StateVector::new(Some("S0".into()), 5)
    );
}

#[tokio::test]
async fn test_sync_step1_divergent_snapshot_gets_everything() {
    let store = DocumentStore::new();

    let _ = store
        .handle_encrypted_update(&doc(), &snapshot_frame("S0", None, &[9]))
        .await
        .unwrap();
    let _ = store
        .handle_encrypted_update(&doc(), &update_frame("S0", 1, 1, &[1]))
        .await
        .unwrap();

    let response = store
        .handle_sync_step1(&doc(), &StateVector::new(Some("ancient".into()), 40).encode())
        .await
        .unwrap();

    assert_eq!(
        response.sync_step2.snapshot.as_ref().map(|s| s.id.clone()),
        Some("S0".into())
    );
    assert_eq!(response.sync_step2.updates.len(), 1);
}

#[tokio::test]
async fn test_sync_step2_applies_snapshot_then_updates() {
    let store = DocumentStore::new();

    // Build a source document and pull its full state.
    let source = DocumentId::from("source");
    let _ = store
        .handle_encrypted_update(&source, &snapshot_frame("S0", None, &[9]))
        .await
        .unwrap();
    let _ = store
        .handle_encrypted_update(&source, &update_frame("S0", 1, 1, &[1]))
        .await
        .unwrap();

    let response = store
        .handle_sync_step1(&source, &StateVector::empty().encode())
        .await
        .unwrap();

    // Replay it into a fresh document.
    let target = DocumentId::from("target");
    let stored = store
        .handle_encrypted_sync_step2(&target, &response.sync_step2.encode())
        .await
        .unwrap();

    assert_eq!(stored.len(), 2); // snapshot echo + updates echo

    let record = store.get_document(&target).await.unwrap();
    assert_eq!(record.active_snapshot_id(), Some(&"S0".into()));
    assert_eq!(record.active_snapshot_version(), 1);
}

#[tokio::test]
async fn test_invalid_frame_is_rejected() {
    let store = DocumentStore::new();

    assert!(matches!(
        store.handle_encrypted_update(&doc(), &[1, 2, 3]).await,
        Err(StoreError::InvalidFrame(_))
    ));
    assert!(matches!(
        store.handle_sync_step1(&doc(), &[9]).await,
        Err(StoreError::InvalidFrame(_))
    ));
}

#[tokio::test]
async fn test_chain_counters_match_final_observations() {
    let store = DocumentStore::new();

    let _ = store
        .handle_encrypted_update(&doc(), &snapshot_frame("S0", None, &[0]))
        .await
        .unwrap();

    for counter in 1..=3 {
        let _ = store
            .handle_encrypted_update(&doc(), &update_frame("S0", 1, counter, &[counter as u8]))
            .await
            .unwrap();
    }
    let _ = store
        .handle_encrypted_update(&doc(), &update_frame("S0", 2, 1, &[50]))
        .await
        .unwrap();

    let _ = store
        .handle_encrypted_update(&doc(), &snapshot_frame("S1", Some("S0"), &[1]))
        .await
        .unwrap();
    let _ = store
        .handle_encrypted_update(&doc(), &update_frame("S1", 1, 1, &[60]))
        .await
        .unwrap();

    let record = store.get_document(&doc()).await.unwrap();

    // Each snapshot keeps the final counter it observed per client.
    let s0 = record.snapshot(&"S0".into()).unwrap();
    assert_eq!(s0.client_counters[&ClientId(1)], 3);
    assert_eq!(s0.client_counters[&ClientId(2)], 1);

    let s1 = record.snapshot(&"S1".into()).unwrap();
    assert_eq!(s1.client_counters[&ClientId(1)], 1);
    assert!(!s1.client_counters.contains_key(&ClientId(2)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_documents_do_not_contend() {
    let store = Arc::new(DocumentStore::new());

    let mut handles = Vec::new();

    for doc_index in 0..4_u64 {
        let store = Arc::clone(&store);

        handles.push(tokio::spawn(async move {
            let key = DocumentId::from(format!("doc-{doc_index}"));

            let _ = store
                .handle_encrypted_update(&key, &snapshot_frame("S0", None, &[0]))
                .await
                .unwrap();

            for counter in 1..=50 {
                let _ = store
                    .handle_encrypted_update(
                        &key,
                        &update_frame("S0", 1, counter, &counter.to_le_bytes()),
                    )
                    .await
                    .unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    for doc_index in 0..4_u64 {
        let key = DocumentId::from(format!("doc-{doc_index}"));
        let record = store.get_document(&key).await.unwrap();

        assert_eq!(record.active_snapshot_version(), 50);
    }
}
