// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use super::*;
use types::{FromBlock, PersistedFilter, ReceiptStatus};

fn temp_storage() -> (tempfile::TempDir, GatewayStorage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = GatewayStorage::open(dir.path(), ReceiptStoreKind::Persistent).unwrap();
    (dir, storage)
}

fn subscription(id: &str) -> SubscriptionInfo {
    SubscriptionInfo {
        id: id.to_string(),
        channel_id: "default".into(),
        name: format!("sub {id}"),
        stream_id: "es-1".into(),
        signer: "user1".into(),
        from_block: FromBlock::Oldest,
        filter: PersistedFilter {
            chaincode_id: Some("erc20".into()),
            ..Default::default()
        },
        payload_type: Default::default(),
        created: types::now_rfc3339(),
    }
}

#[test]
fn roundtrip_and_remove() {
    let (_dir, storage) = temp_storage();

    let sub = subscription("sb-1");
    storage.subscriptions.insert(&sub.id, &sub).unwrap();
    assert_eq!(storage.subscriptions.get("sb-1").unwrap(), Some(sub));

    assert!(storage.subscriptions.remove("sb-1").unwrap());
    assert_eq!(storage.subscriptions.get("sb-1").unwrap(), None);
    // Removing again reports absence rather than failing.
    assert!(!storage.subscriptions.remove("sb-1").unwrap());
}

#[test]
fn iteration_is_key_ordered() {
    let (_dir, storage) = temp_storage();

    for id in ["sb-c", "sb-a", "sb-b"] {
        storage
            .subscriptions
            .insert(id, &subscription(id))
            .unwrap();
    }

    let keys: Vec<String> = storage.subscriptions.iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["sb-a", "sb-b", "sb-c"]);
}

#[test]
fn column_families_are_isolated() {
    let (_dir, storage) = temp_storage();

    storage
        .subscriptions
        .insert("shared-key", &subscription("shared-key"))
        .unwrap();
    // The same key in another family does not exist.
    assert!(storage.checkpoints.get("shared-key").unwrap().is_none());
}

#[test]
fn values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let storage = GatewayStorage::open(dir.path(), ReceiptStoreKind::Persistent).unwrap();
        storage
            .subscriptions
            .insert("sb-1", &subscription("sb-1"))
            .unwrap();
        storage.checkpoints.advance("sb-1", 42).unwrap();
    }

    let storage = GatewayStorage::open(dir.path(), ReceiptStoreKind::Persistent).unwrap();
    assert!(storage.subscriptions.get("sb-1").unwrap().is_some());
    assert_eq!(storage.checkpoints.get("sb-1").unwrap(), Some(42));
}

#[test]
fn checkpoint_never_moves_backwards() {
    let (_dir, storage) = temp_storage();

    assert_eq!(storage.checkpoints.advance("sb-1", 5).unwrap(), 5);
    assert_eq!(storage.checkpoints.advance("sb-1", 3).unwrap(), 5);
    assert_eq!(storage.checkpoints.advance("sb-1", 5).unwrap(), 5);
    assert_eq!(storage.checkpoints.advance("sb-1", 9).unwrap(), 9);
    assert_eq!(storage.checkpoints.get("sb-1").unwrap(), Some(9));

    // A reset is the one sanctioned way down.
    storage.checkpoints.reset("sb-1", 0).unwrap();
    assert_eq!(storage.checkpoints.get("sb-1").unwrap(), Some(0));
}

#[test]
fn receipt_terminal_states_are_one_way() {
    let (_dir, storage) = temp_storage();

    let pending = types::Receipt::pending("r-1".into(), "default".into(), "user1".into());
    storage.receipts.put_pending(&pending).unwrap();

    let done = storage
        .receipts
        .complete(
            "r-1",
            ReceiptStatus::Success,
            Some(serde_json::json!({"txId": "abc"})),
            None,
        )
        .unwrap();
    assert_eq!(done.status, ReceiptStatus::Success);
    assert_eq!(done.headers.reply_type, "TransactionSuccess");
    assert!(done.completed_at.is_some());

    // A later failure report cannot overwrite the terminal state.
    let still_done = storage
        .receipts
        .complete("r-1", ReceiptStatus::Failed, None, Some("boom".into()))
        .unwrap();
    assert_eq!(still_done.status, ReceiptStatus::Success);
    assert!(still_done.error_message.is_none());
}

#[test]
fn completing_unknown_receipt_fails() {
    let (_dir, storage) = temp_storage();
    let result = storage
        .receipts
        .complete("missing", ReceiptStatus::Failed, None, None);
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[test]
fn receipt_listing_is_newest_first_and_capped() {
    let store = ReceiptStore::new(std::sync::Arc::new(MemMap::new()));

    for i in 0..5 {
        let mut receipt =
            types::Receipt::pending(format!("r-{i}"), "default".into(), "user1".into());
        // Distinct, strictly increasing arrival times.
        receipt.received_at = format!("2024-05-01T00:00:0{i}Z");
        store.put_pending(&receipt).unwrap();
    }

    let listed = store.list(3).unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].id, "r-4");
    assert_eq!(listed[2].id, "r-2");
}
