// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use super::*;
use std::time::Duration;
use store::MemMap;
use test_utils::MockLedger;

struct Fixture {
    dispatcher: TxDispatcher,
    ledger: Arc<MockLedger>,
    receipts: ReceiptStore,
    ws: WsServer,
    _handles: Vec<JoinHandle<()>>,
}

fn fixture(workers: usize, queue_depth: usize, tx_timeout: Duration) -> Fixture {
    let ledger = MockLedger::new();
    let receipts = ReceiptStore::new(Arc::new(MemMap::new()));
    let ws = WsServer::new(Duration::from_secs(5));
    let (dispatcher, handles) = TxDispatcher::spawn(
        workers,
        queue_depth,
        tx_timeout,
        ledger.clone(),
        receipts.clone(),
        ws.clone(),
        DispatcherMetrics::for_tests(),
    );
    Fixture {
        dispatcher,
        ledger,
        receipts,
        ws,
        _handles: handles,
    }
}

fn request(signer: &str, sequence: usize) -> TxRequest {
    TxRequest {
        request_id: String::new(),
        signer: signer.to_string(),
        channel_id: "default".to_string(),
        chaincode_id: "erc20".to_string(),
        method: format!("Transfer#{sequence}"),
        args: vec![sequence.to_string()],
        transient_map: Default::default(),
        is_init: false,
    }
}

async fn wait_for_status(
    receipts: &ReceiptStore,
    request_id: &str,
    status: ReceiptStatus,
) -> Receipt {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(receipt) = receipts.get(request_id).unwrap() {
                if receipt.status == status {
                    return receipt;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for receipt status")
}

#[tokio::test]
async fn submission_writes_pending_then_terminal_receipt() {
    let fixture = fixture(2, 16, Duration::from_secs(5));
    fixture.ledger.set_stalled(true);

    let id = fixture.dispatcher.submit(request("user1", 0)).unwrap();
    let pending = fixture.receipts.get(&id).unwrap().unwrap();
    assert_eq!(pending.status, ReceiptStatus::Pending);
    assert_eq!(pending.headers.signer.as_deref(), Some("user1"));

    fixture.ledger.set_stalled(false);
    let done = wait_for_status(&fixture.receipts, &id, ReceiptStatus::Success).await;
    assert!(done.completed_at.is_some());
    assert_eq!(done.headers.reply_type, "TransactionSuccess");
    assert!(done.result.is_some());
}

#[tokio::test]
async fn failed_invoke_produces_failed_receipt() {
    let fixture = fixture(2, 16, Duration::from_secs(5));
    fixture.ledger.set_failing(true);

    let id = fixture.dispatcher.submit(request("user1", 0)).unwrap();
    let receipt = wait_for_status(&fixture.receipts, &id, ReceiptStatus::Failed).await;
    assert!(receipt.error_message.unwrap().contains("endorsement failed"));
}

#[tokio::test]
async fn stuck_invoke_times_out_into_failed_receipt() {
    let fixture = fixture(1, 16, Duration::from_millis(100));
    fixture.ledger.set_stalled(true);

    let id = fixture.dispatcher.submit(request("user1", 0)).unwrap();
    let receipt = wait_for_status(&fixture.receipts, &id, ReceiptStatus::Failed).await;
    assert!(receipt.error_message.unwrap().contains("did not complete"));
}

#[tokio::test]
async fn per_signer_fifo_is_preserved() {
    let fixture = fixture(4, 64, Duration::from_secs(5));
    fixture.ledger.set_stalled(true);

    let mut ids_a = Vec::new();
    let mut ids_b = Vec::new();
    for sequence in 0..10 {
        ids_a.push(fixture.dispatcher.submit(request("signer-a", sequence)).unwrap());
        ids_b.push(fixture.dispatcher.submit(request("signer-b", sequence)).unwrap());
    }
    fixture.ledger.set_stalled(false);

    for id in ids_a.iter().chain(ids_b.iter()) {
        wait_for_status(&fixture.receipts, id, ReceiptStatus::Success).await;
    }

    // Completion order per signer matches submission order; cross-signer
    // interleaving is unconstrained.
    let completed = fixture.ledger.completed_invokes();
    for signer in ["signer-a", "signer-b"] {
        let sequences: Vec<&str> = completed
            .iter()
            .filter(|invoke| invoke.signer == signer)
            .map(|invoke| invoke.args[0].as_str())
            .collect();
        let expected: Vec<String> = (0..10).map(|s| s.to_string()).collect();
        assert_eq!(sequences, expected, "out of order for {signer}");
    }
}

#[tokio::test]
async fn full_shard_queue_rejects_with_backpressure() {
    let queue_depth = 3;
    let fixture = fixture(1, queue_depth, Duration::from_secs(5));
    fixture.ledger.set_stalled(true);

    let mut accepted = Vec::new();
    let rejected = loop {
        match fixture.dispatcher.submit(request("signer-a", accepted.len())) {
            Ok(id) => {
                accepted.push(id);
                assert!(
                    accepted.len() <= queue_depth + 1,
                    "queue grew past its bound"
                );
            }
            Err(e) => break e,
        }
    };
    assert!(matches!(rejected, SubmitError::QueueFull));
    assert!(accepted.len() >= queue_depth);

    // A rejected submission leaves no receipt behind.
    assert_eq!(
        fixture.receipts.list(100).unwrap().len(),
        accepted.len()
    );

    // Unstalling drains the queue in submission order.
    fixture.ledger.set_stalled(false);
    for id in &accepted {
        wait_for_status(&fixture.receipts, id, ReceiptStatus::Success).await;
    }
    let completed = fixture.ledger.completed_invokes();
    let sequences: Vec<&str> = completed.iter().map(|i| i.args[0].as_str()).collect();
    let expected: Vec<String> = (0..accepted.len()).map(|s| s.to_string()).collect();
    assert_eq!(sequences, expected);
}

#[tokio::test]
async fn completed_receipts_are_published_to_replies() {
    let fixture = fixture(2, 16, Duration::from_secs(5));
    let mut replies = fixture.ws.subscribe_replies();

    let id = fixture.dispatcher.submit(request("user1", 0)).unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), replies.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply["_id"], id.as_str());
    assert_eq!(reply["headers"]["type"], "TransactionSuccess");
}

#[tokio::test]
async fn invalid_requests_are_rejected_up_front() {
    let fixture = fixture(1, 4, Duration::from_secs(5));
    let missing_signer = request("", 0);
    assert!(matches!(
        fixture.dispatcher.submit(missing_signer),
        Err(SubmitError::Invalid("signer"))
    ));

    let mut missing_method = request("user1", 0);
    missing_method.method.clear();
    assert!(matches!(
        fixture.dispatcher.submit(missing_method),
        Err(SubmitError::Invalid("method"))
    ));
}

#[tokio::test]
async fn sync_execute_returns_the_result_without_a_receipt() {
    let fixture = fixture(1, 4, Duration::from_secs(5));
    let result = fixture.dispatcher.execute(request("user1", 0)).await.unwrap();
    assert!(result.transaction_id.starts_with("mock-tx-"));
    assert!(fixture.receipts.list(10).unwrap().is_empty());

    let queried = fixture.dispatcher.query(request("user1", 1)).await.unwrap();
    assert_eq!(queried, b"queried:Transfer#1");
}
