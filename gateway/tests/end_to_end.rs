// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Scenario tests driving the whole gateway over real HTTP and WebSocket
//! connections, with the ledger played by a scriptable mock.

use futures::{SinkExt, StreamExt};
use gateway::{Gateway, GatewayConfig};
use serde_json::{json, Value};
use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};
use test_utils::{block, chaincode_event, MockLedger};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config(dir: &Path) -> GatewayConfig {
    serde_json::from_value(json!({
        "http": {"address": "127.0.0.1", "port": 0},
        "store": {"path": dir.to_str().unwrap(), "receipts": "persistent"},
        "events": {"processingTimeout": "2s", "resubscribeDelay": "100ms"},
        "dispatcher": {"workers": 2, "queueDepth": 8, "txTimeout": "2s"}
    }))
    .unwrap()
}

async fn spawn_gateway(dir: &Path, ledger: &Arc<MockLedger>) -> Gateway {
    Gateway::spawn(test_config(dir), ledger.clone())
        .await
        .unwrap()
}

fn base_url(addr: SocketAddr) -> String {
    format!("http://{addr}")
}

async fn post_json(http: &reqwest::Client, url: &str, body: Value) -> (u16, Value) {
    let response = http.post(url).json(&body).send().await.unwrap();
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn create_stream(
    http: &reqwest::Client,
    base: &str,
    topic: &str,
    error_handling: &str,
    batch_size: u64,
) -> String {
    let (status, body) = post_json(
        http,
        &format!("{base}/eventstreams"),
        json!({
            "name": format!("stream-{topic}"),
            "type": "websocket",
            "websocket": {"topic": topic},
            "batchSize": batch_size,
            "batchTimeoutMS": 100,
            "errorHandling": error_handling,
            "blockedRetryDelaySec": 1
        }),
    )
    .await;
    assert_eq!(status, 200, "create stream failed: {body}");
    body["id"].as_str().unwrap().to_string()
}

async fn create_subscription(
    http: &reqwest::Client,
    base: &str,
    stream_id: &str,
    event_filter: Option<&str>,
) -> String {
    let mut filter = json!({"chaincodeId": "erc20"});
    if let Some(pattern) = event_filter {
        filter["eventFilter"] = json!(pattern);
    }
    let (status, body) = post_json(
        http,
        &format!("{base}/subscriptions"),
        json!({
            "channel": "default",
            "stream": stream_id,
            "signer": "user1",
            "fromBlock": "oldest",
            "filter": filter,
            "payloadType": "string"
        }),
    )
    .await;
    assert_eq!(status, 200, "create subscription failed: {body}");
    body["id"].as_str().unwrap().to_string()
}

async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    client
}

async fn send_frame(client: &mut WsClient, frame: Value) {
    client
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();
}

async fn listen(client: &mut WsClient, topic: &str) {
    send_frame(client, json!({"type": "listen", "topic": topic})).await;
}

async fn ack(client: &mut WsClient, topic: &str) {
    send_frame(client, json!({"type": "ack", "topic": topic})).await;
}

async fn nack(client: &mut WsClient, topic: &str, message: &str) {
    send_frame(
        client,
        json!({"type": "error", "topic": topic, "message": message}),
    )
    .await;
}

async fn recv_json(client: &mut WsClient) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a websocket frame")
            .expect("websocket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Feed blocks 0..=5, ack deliveries for blocks 0..=3, crash, restart,
/// and check delivery resumes at block 4.
#[tokio::test]
async fn resume_restarts_from_last_acked_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MockLedger::new();
    for number in 0..=5u64 {
        ledger.push_block("default", block(number, vec![chaincode_event("Transfer", 0, 0)]));
    }

    // First life.
    {
        let gateway = spawn_gateway(dir.path(), &ledger).await;
        let http = reqwest::Client::new();
        let base = base_url(gateway.local_addr);

        let mut client = ws_connect(gateway.local_addr).await;
        listen(&mut client, "tokens").await;
        let stream_id = create_stream(&http, &base, "tokens", "block", 1).await;
        create_subscription(&http, &base, &stream_id, None).await;

        for expected_block in 0..=3u64 {
            let batch = recv_json(&mut client).await;
            assert_eq!(batch[0]["blockNumber"], expected_block);
            ack(&mut client, "tokens").await;
        }
        // Block 4 arrives but is never acknowledged.
        let unacked = recv_json(&mut client).await;
        assert_eq!(unacked[0]["blockNumber"], 4);
        drop(client);
        gateway.shutdown().await;
    }

    // Second life: same store, same chain.
    let gateway = spawn_gateway(dir.path(), &ledger).await;
    let mut client = ws_connect(gateway.local_addr).await;
    listen(&mut client, "tokens").await;

    let batch = recv_json(&mut client).await;
    assert_eq!(
        batch[0]["blockNumber"], 4,
        "delivery must resume at the first unacknowledged block"
    );
    ack(&mut client, "tokens").await;
    let batch = recv_json(&mut client).await;
    assert_eq!(batch[0]["blockNumber"], 5);
    ack(&mut client, "tokens").await;
    gateway.shutdown().await;
}

/// A client `error` reply in block mode redelivers the same batch after
/// the retry delay; the checkpoint holds until the ack.
#[tokio::test]
async fn block_mode_redelivers_after_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MockLedger::new();
    ledger.push_block("default", block(0, vec![chaincode_event("Transfer", 0, 0)]));

    let gateway = spawn_gateway(dir.path(), &ledger).await;
    let http = reqwest::Client::new();
    let base = base_url(gateway.local_addr);

    let mut client = ws_connect(gateway.local_addr).await;
    listen(&mut client, "retries").await;
    let stream_id = create_stream(&http, &base, "retries", "block", 1).await;
    create_subscription(&http, &base, &stream_id, None).await;

    let first = recv_json(&mut client).await;
    nack(&mut client, "retries", "not ready").await;

    let redelivered = recv_json(&mut client).await;
    assert_eq!(first, redelivered, "retry must resend the identical batch");
    ack(&mut client, "retries").await;

    // Only after the ack does the next block's event flow.
    ledger.push_block("default", block(1, vec![chaincode_event("Transfer", 0, 0)]));
    let next = recv_json(&mut client).await;
    assert_eq!(next[0]["blockNumber"], 1);
    ack(&mut client, "retries").await;
    gateway.shutdown().await;
}

/// In skip mode a client `error` advances past the failed batch.
#[tokio::test]
async fn skip_mode_moves_on_after_client_error() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MockLedger::new();
    ledger.push_block("default", block(0, vec![chaincode_event("Skipped", 0, 0)]));
    ledger.push_block("default", block(1, vec![chaincode_event("Kept", 0, 0)]));

    let gateway = spawn_gateway(dir.path(), &ledger).await;
    let http = reqwest::Client::new();
    let base = base_url(gateway.local_addr);

    let mut client = ws_connect(gateway.local_addr).await;
    listen(&mut client, "skips").await;
    let stream_id = create_stream(&http, &base, "skips", "skip", 1).await;
    create_subscription(&http, &base, &stream_id, None).await;

    let first = recv_json(&mut client).await;
    assert_eq!(first[0]["eventName"], "Skipped");
    nack(&mut client, "skips", "cannot process").await;

    let next = recv_json(&mut client).await;
    assert_eq!(
        next[0]["eventName"], "Kept",
        "skip mode must advance to the next block"
    );
    ack(&mut client, "skips").await;
    gateway.shutdown().await;
}

/// Only events whose name matches the anchored filter are delivered.
#[tokio::test]
async fn event_name_filter_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MockLedger::new();
    ledger.push_block(
        "default",
        block(
            0,
            vec![
                chaincode_event("AssetCreated", 0, 0),
                chaincode_event("TransferConditional", 1, 0),
                chaincode_event("AssetBurned", 2, 0),
            ],
        ),
    );

    let gateway = spawn_gateway(dir.path(), &ledger).await;
    let http = reqwest::Client::new();
    let base = base_url(gateway.local_addr);

    let mut client = ws_connect(gateway.local_addr).await;
    listen(&mut client, "assets").await;
    let stream_id = create_stream(&http, &base, "assets", "block", 10).await;
    create_subscription(&http, &base, &stream_id, Some("Asset.*")).await;

    let batch = recv_json(&mut client).await;
    let names: Vec<&str> = batch
        .as_array()
        .unwrap()
        .iter()
        .map(|record| record["eventName"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["AssetCreated", "AssetBurned"]);
    ack(&mut client, "assets").await;
    gateway.shutdown().await;
}

/// The REST error mapping clients depend on: 404, 409 and 400.
#[tokio::test]
async fn rest_error_codes() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MockLedger::new();
    let gateway = spawn_gateway(dir.path(), &ledger).await;
    let http = reqwest::Client::new();
    let base = base_url(gateway.local_addr);

    // Unknown resources.
    for url in [
        format!("{base}/subscriptions/sb-missing"),
        format!("{base}/eventstreams/es-missing"),
        format!("{base}/replies/r-missing"),
    ] {
        let status = http.get(url).send().await.unwrap().status().as_u16();
        assert_eq!(status, 404);
    }

    // A stream with subscriptions attached cannot be deleted.
    let stream_id = create_stream(&http, &base, "locked", "block", 1).await;
    let sub_id = create_subscription(&http, &base, &stream_id, None).await;
    let status = http
        .delete(format!("{base}/eventstreams/{stream_id}"))
        .send()
        .await
        .unwrap()
        .status()
        .as_u16();
    assert_eq!(status, 409);

    // Reset requires a suspended stream.
    let (status, _) = post_json(
        &http,
        &format!("{base}/subscriptions/{sub_id}/reset"),
        json!({"fromBlock": "0"}),
    )
    .await;
    assert_eq!(status, 409);

    let (status, _) = post_json(
        &http,
        &format!("{base}/eventstreams/{stream_id}/suspend"),
        json!({}),
    )
    .await;
    assert_eq!(status, 200);
    let (status, _) = post_json(
        &http,
        &format!("{base}/subscriptions/{sub_id}/reset"),
        json!({"fromBlock": "0"}),
    )
    .await;
    assert_eq!(status, 200);

    // Malformed definitions.
    let (status, _) = post_json(
        &http,
        &format!("{base}/eventstreams"),
        json!({"type": "websocket"}),
    )
    .await;
    assert_eq!(status, 400);
    let (status, _) = post_json(
        &http,
        &format!("{base}/subscriptions"),
        json!({
            "channel": "default",
            "stream": stream_id,
            "filter": {"chaincodeId": "erc20", "eventFilter": "Asset["}
        }),
    )
    .await;
    assert_eq!(status, 400);

    gateway.shutdown().await;
}

/// Async submissions produce a retrievable receipt and a reply frame for
/// `listenreplies` subscribers; sync submissions return the result inline.
#[tokio::test]
async fn async_transactions_flow_through_receipts_and_replies() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MockLedger::new();
    let gateway = spawn_gateway(dir.path(), &ledger).await;
    let http = reqwest::Client::new();
    let base = base_url(gateway.local_addr);

    let mut replies_client = ws_connect(gateway.local_addr).await;
    send_frame(&mut replies_client, json!({"type": "listenreplies"})).await;
    // Give the reader a moment to register the replies subscription.
    tokio::time::sleep(Duration::from_millis(100)).await;

    ledger.set_stalled(true);
    let tx_body = json!({
        "signer": "user1",
        "channelId": "default",
        "chaincodeId": "erc20",
        "method": "Transfer",
        "args": ["bob", "100"]
    });
    let (status, body) =
        post_json(&http, &format!("{base}/transactions"), tx_body.clone()).await;
    assert_eq!(status, 202);
    let request_id = body["id"].as_str().unwrap().to_string();

    let pending = http
        .get(format!("{base}/replies/{request_id}"))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(pending["status"], "pending");

    ledger.set_stalled(false);
    let reply = recv_json(&mut replies_client).await;
    assert_eq!(reply["_id"], request_id.as_str());
    assert_eq!(reply["headers"]["type"], "TransactionSuccess");

    let stored = http
        .get(format!("{base}/replies/{request_id}"))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(stored["status"], "succeeded");

    // The sync path returns the transaction result inline.
    let (status, body) =
        post_json(&http, &format!("{base}/transactions?sync=true"), tx_body).await;
    assert_eq!(status, 200);
    assert!(body["transactionId"].as_str().unwrap().starts_with("mock-tx-"));

    gateway.shutdown().await;
}

/// When a signer's queue fills, the next submission is rejected with 429,
/// and the queue drains in order once the ledger recovers.
#[tokio::test]
async fn dispatcher_backpressure_returns_429() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = MockLedger::new();
    let mut config = test_config(dir.path());
    config.dispatcher.workers = 1;
    config.dispatcher.queue_depth = 2;
    let gateway = Gateway::spawn(config, ledger.clone()).await.unwrap();
    let http = reqwest::Client::new();
    let base = base_url(gateway.local_addr);

    ledger.set_stalled(true);
    let mut accepted = Vec::new();
    let mut rejected = 0;
    for sequence in 0..6 {
        let (status, body) = post_json(
            &http,
            &format!("{base}/transactions"),
            json!({
                "signer": "signer-a",
                "channelId": "default",
                "chaincodeId": "erc20",
                "method": "Transfer",
                "args": [sequence.to_string()]
            }),
        )
        .await;
        match status {
            202 => accepted.push(body["id"].as_str().unwrap().to_string()),
            429 => {
                rejected += 1;
                break;
            }
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(rejected, 1, "the over-capacity submission must get 429");
    assert!(accepted.len() >= 2);

    ledger.set_stalled(false);
    for id in &accepted {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let receipt = http
                    .get(format!("{base}/replies/{id}"))
                    .send()
                    .await
                    .unwrap()
                    .json::<Value>()
                    .await
                    .unwrap();
                if receipt["status"] == "succeeded" {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("queued submission never completed");
    }

    // Completion order matches submission order for the signer.
    let sequences: Vec<String> = ledger
        .completed_invokes()
        .iter()
        .map(|invoke| invoke.args[0].clone())
        .collect();
    let expected: Vec<String> = (0..accepted.len()).map(|s| s.to_string()).collect();
    assert_eq!(sequences, expected);

    gateway.shutdown().await;
}
