// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::LedgerError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;
use types::BlockType;

/// One chaincode event as decoded from a ledger block, before any
/// subscription routing or payload rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaincodeEvent {
    pub chaincode_id: String,
    pub transaction_id: String,
    pub transaction_index: u32,
    pub event_index: u32,
    pub event_name: String,
    pub payload: Vec<u8>,
    /// Seconds since the epoch, from the block's first endorser timestamp.
    pub timestamp: Option<i64>,
}

/// A ledger block decoded into the normalised form the event core consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBlock {
    pub number: u64,
    pub kind: BlockType,
    pub events: Vec<ChaincodeEvent>,
}

/// An item surfaced on a block subscription feed.
#[derive(Debug, Clone)]
pub enum LedgerUpdate {
    Block(DecodedBlock),
    /// The ledger-side subscription failed; the receiver decides whether
    /// and where to resume.
    Dropped(String),
}

/// The receiving half of a block subscription. Dropping it tears down the
/// ledger-side subscription.
pub type BlockFeed = mpsc::Receiver<LedgerUpdate>;

/// A chain-mutating invocation, as forwarded by the transaction dispatcher.
#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    pub signer: String,
    pub channel_id: String,
    pub chaincode_id: String,
    pub method: String,
    pub args: Vec<String>,
    pub transient_map: HashMap<String, String>,
    pub is_init: bool,
}

/// The outcome of a successful invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub transaction_id: String,
    /// Raw chaincode response bytes, if any.
    pub payload: Vec<u8>,
    pub signer_msp: String,
}

impl TxResult {
    /// The JSON body stored on the receipt and returned to sync callers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "transactionId": self.transaction_id,
            "payload": String::from_utf8_lossy(&self.payload),
            "signerMSP": self.signer_msp,
        })
    }
}

/// Interface to the ledger RPC layer. The production implementation wraps
/// the vendor SDK; tests use a scriptable mock. Everything the event and
/// transaction cores need from the chain goes through here.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Submit a transaction and wait for its commit status.
    async fn invoke(&self, request: InvokeRequest) -> Result<TxResult, LedgerError>;

    /// Evaluate a read-only transaction against a peer.
    async fn query(&self, request: InvokeRequest) -> Result<Vec<u8>, LedgerError>;

    /// The current height of the channel's chain.
    async fn chain_height(&self, channel_id: &str) -> Result<u64, LedgerError>;

    /// Open a block subscription on `(channel, chaincode)` seeking to
    /// `from_block`. Blocks arrive decoded and in order.
    async fn subscribe(
        &self,
        channel_id: &str,
        chaincode_id: &str,
        from_block: u64,
    ) -> Result<BlockFeed, LedgerError>;
}
