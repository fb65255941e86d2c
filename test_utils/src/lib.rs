// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

//! Fixtures shared by the gateway crates' tests: a scriptable in-memory
//! ledger plus builders for the records the tests feed through it.

use async_trait::async_trait;
use ledger::{
    BlockFeed, ChaincodeEvent, DecodedBlock, InvokeRequest, LedgerClient, LedgerError,
    LedgerUpdate, TxResult,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::sync::{mpsc, watch};
use types::{
    BlockType, ErrorHandling, FromBlock, PersistedFilter, StreamDefinition, StreamKind,
    SubscriptionInfo, WebSocketSink, WebhookSink,
};

const FEED_CAPACITY: usize = 1_024;

struct Feed {
    channel_id: String,
    next_block: u64,
    tx: mpsc::Sender<LedgerUpdate>,
}

/// A scriptable ledger: tests append blocks, stall or fail invocations, and
/// observe the order submissions complete in.
pub struct MockLedger {
    blocks: Mutex<Vec<DecodedBlock>>,
    feeds: Mutex<Vec<Feed>>,
    completed_invokes: Mutex<Vec<InvokeRequest>>,
    fail_invokes: AtomicBool,
    stall: watch::Sender<bool>,
    tx_counter: AtomicU64,
}

impl Default for MockLedger {
    fn default() -> Self {
        let (stall, _) = watch::channel(false);
        MockLedger {
            blocks: Mutex::new(Vec::new()),
            feeds: Mutex::new(Vec::new()),
            completed_invokes: Mutex::new(Vec::new()),
            fail_invokes: AtomicBool::new(false),
            stall,
            tx_counter: AtomicU64::new(0),
        }
    }
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a block to the chain and push it to every live feed on the
    /// block's channel whose cursor is at or below it.
    pub fn push_block(&self, channel_id: &str, block: DecodedBlock) {
        let number = block.number;
        self.blocks.lock().push(block.clone());
        let mut feeds = self.feeds.lock();
        feeds.retain(|feed| !feed.tx.is_closed());
        for feed in feeds.iter_mut() {
            if feed.channel_id == channel_id && number >= feed.next_block {
                feed.next_block = number + 1;
                // A feed torn down concurrently just misses the block; it
                // will be replayed on the next subscribe.
                let _ = feed.tx.try_send(LedgerUpdate::Block(block.clone()));
            }
        }
    }

    /// Surface a ledger-side failure on every live feed.
    pub fn drop_feeds(&self, reason: &str) {
        let feeds = self.feeds.lock();
        for feed in feeds.iter() {
            let _ = feed
                .tx
                .try_send(LedgerUpdate::Dropped(reason.to_string()));
        }
    }

    /// While stalled, `invoke` parks until unstalled.
    pub fn set_stalled(&self, stalled: bool) {
        let _ = self.stall.send(stalled);
    }

    /// Make every subsequent `invoke` fail.
    pub fn set_failing(&self, failing: bool) {
        self.fail_invokes.store(failing, Ordering::SeqCst);
    }

    /// Invocations in the order they completed.
    pub fn completed_invokes(&self) -> Vec<InvokeRequest> {
        self.completed_invokes.lock().clone()
    }

    pub fn live_feed_count(&self) -> usize {
        let mut feeds = self.feeds.lock();
        feeds.retain(|feed| !feed.tx.is_closed());
        feeds.len()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn invoke(&self, request: InvokeRequest) -> Result<TxResult, LedgerError> {
        let mut stalled = self.stall.subscribe();
        while *stalled.borrow() {
            if stalled.changed().await.is_err() {
                break;
            }
        }
        if self.fail_invokes.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("endorsement failed".to_string()));
        }
        let tx_number = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        self.completed_invokes.lock().push(request.clone());
        Ok(TxResult {
            transaction_id: format!("mock-tx-{tx_number}"),
            payload: request.method.into_bytes(),
            signer_msp: "MockMSP".to_string(),
        })
    }

    async fn query(&self, request: InvokeRequest) -> Result<Vec<u8>, LedgerError> {
        if self.fail_invokes.load(Ordering::SeqCst) {
            return Err(LedgerError::Rpc("query failed".to_string()));
        }
        Ok(format!("queried:{}", request.method).into_bytes())
    }

    async fn chain_height(&self, _channel_id: &str) -> Result<u64, LedgerError> {
        let blocks = self.blocks.lock();
        Ok(blocks.iter().map(|b| b.number + 1).max().unwrap_or(0))
    }

    async fn subscribe(
        &self,
        channel_id: &str,
        _chaincode_id: &str,
        from_block: u64,
    ) -> Result<BlockFeed, LedgerError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        // Replay history from the seek point before going live.
        for block in self.blocks.lock().iter() {
            if block.number >= from_block {
                let _ = tx.try_send(LedgerUpdate::Block(block.clone()));
            }
        }
        let next_block = self
            .blocks
            .lock()
            .iter()
            .map(|b| b.number + 1)
            .max()
            .unwrap_or(0)
            .max(from_block);
        self.feeds.lock().push(Feed {
            channel_id: channel_id.to_string(),
            next_block,
            tx,
        });
        Ok(rx)
    }
}

/// A transaction block carrying the given chaincode events.
pub fn block(number: u64, events: Vec<ChaincodeEvent>) -> DecodedBlock {
    DecodedBlock {
        number,
        kind: BlockType::Tx,
        events,
    }
}

/// A channel configuration block (never carries chaincode events).
pub fn config_block(number: u64) -> DecodedBlock {
    DecodedBlock {
        number,
        kind: BlockType::Config,
        events: Vec::new(),
    }
}

/// A chaincode event at position `(tx_index, event_index)` in its block.
pub fn chaincode_event(name: &str, tx_index: u32, event_index: u32) -> ChaincodeEvent {
    ChaincodeEvent {
        chaincode_id: "erc20".to_string(),
        transaction_id: format!("tx-{tx_index}"),
        transaction_index: tx_index,
        event_index,
        event_name: name.to_string(),
        payload: format!("{{\"event\":\"{name}\"}}").into_bytes(),
        timestamp: Some(1_700_000_000),
    }
}

pub fn chaincode_event_with_payload(
    name: &str,
    tx_index: u32,
    event_index: u32,
    payload: &[u8],
) -> ChaincodeEvent {
    ChaincodeEvent {
        payload: payload.to_vec(),
        ..chaincode_event(name, tx_index, event_index)
    }
}

/// A subscription on the `erc20` chaincode of the `default` channel.
pub fn subscription(id: &str, stream_id: &str, from_block: FromBlock) -> SubscriptionInfo {
    SubscriptionInfo {
        id: id.to_string(),
        channel_id: "default".to_string(),
        name: format!("sub {id}"),
        stream_id: stream_id.to_string(),
        signer: "user1".to_string(),
        from_block,
        filter: PersistedFilter {
            block_type: None,
            chaincode_id: Some("erc20".to_string()),
            event_filter: None,
        },
        payload_type: Default::default(),
        created: types::now_rfc3339(),
    }
}

/// A websocket stream definition with test friendly batching defaults.
pub fn websocket_stream(id: &str, topic: &str) -> StreamDefinition {
    StreamDefinition {
        id: id.to_string(),
        name: format!("stream {id}"),
        kind: StreamKind::WebSocket,
        batch_size: 1,
        batch_timeout_ms: 50,
        blocked_retry_delay_sec: 1,
        error_handling: ErrorHandling::Block,
        websocket: Some(WebSocketSink {
            topic: topic.to_string(),
        }),
        webhook: None,
        timestamps: false,
        created: types::now_rfc3339(),
    }
}

/// A webhook stream definition pointing at the given URL.
pub fn webhook_stream(id: &str, url: &str) -> StreamDefinition {
    StreamDefinition {
        id: id.to_string(),
        name: format!("stream {id}"),
        kind: StreamKind::Webhook,
        batch_size: 1,
        batch_timeout_ms: 50,
        blocked_retry_delay_sec: 1,
        error_handling: ErrorHandling::Block,
        websocket: None,
        webhook: Some(WebhookSink {
            url: url.to_string(),
            request_timeout_sec: 5,
        }),
        timestamps: false,
        created: types::now_rfc3339(),
    }
}
