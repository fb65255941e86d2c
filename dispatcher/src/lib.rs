// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

pub mod metrics;

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
pub mod dispatcher_tests;

use crate::metrics::DispatcherMetrics;
use ledger::{InvokeRequest, LedgerClient, LedgerError, TxResult};
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use store::{ReceiptStore, StoreError};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use types::{Receipt, ReceiptStatus, TxRequest};
use ws::WsServer;

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The signer's worker queue is at capacity; the client owns the retry.
    #[error("too many in-flight transactions for this signer, retry later")]
    QueueFull,
    #[error("dispatcher is shutting down")]
    ShuttingDown,
    #[error("invalid transaction request: missing {0}")]
    Invalid(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accepts asynchronous transaction submissions, spreads them over a fixed
/// pool of workers sharded by signer, and tracks each one with a receipt
/// from `pending` to its terminal state.
///
/// Requests for one signer always land on the same shard and each shard
/// executes serially, so per-signer submission order is completion order.
pub struct TxDispatcher {
    shards: Vec<mpsc::Sender<TxRequest>>,
    receipts: ReceiptStore,
    ledger: Arc<dyn LedgerClient>,
    tx_timeout: Duration,
    metrics: Arc<DispatcherMetrics>,
}

impl TxDispatcher {
    /// Spawn the worker pool. `queue_depth` bounds each shard's inbound
    /// queue; a full queue rejects submissions with [`SubmitError::QueueFull`].
    #[must_use]
    pub fn spawn(
        workers: usize,
        queue_depth: usize,
        tx_timeout: Duration,
        ledger: Arc<dyn LedgerClient>,
        receipts: ReceiptStore,
        ws: WsServer,
        metrics: Arc<DispatcherMetrics>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        assert!(workers > 0, "dispatcher needs at least one worker");
        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx_job, rx_job) = mpsc::channel(queue_depth);
            shards.push(tx_job);
            handles.push(
                Worker {
                    index,
                    ledger: ledger.clone(),
                    receipts: receipts.clone(),
                    ws: ws.clone(),
                    tx_timeout,
                    rx_job,
                    metrics: metrics.clone(),
                }
                .spawn(),
            );
        }
        info!(workers, queue_depth, "transaction dispatcher started");
        (
            TxDispatcher {
                shards,
                receipts,
                ledger,
                tx_timeout,
                metrics,
            },
            handles,
        )
    }

    /// Accept an async submission: reserve a queue slot on the signer's
    /// shard, persist the `pending` receipt, then hand the request to the
    /// worker. Reserving first keeps a rejected submission from leaving an
    /// orphaned receipt behind.
    pub fn submit(&self, mut request: TxRequest) -> Result<String, SubmitError> {
        Self::validate(&request)?;
        if request.request_id.is_empty() {
            request.request_id = types::new_id();
        }
        let request_id = request.request_id.clone();

        let shard = shard_for(&request.signer, self.shards.len());
        let permit = self.shards[shard].try_reserve().map_err(|e| match e {
            TrySendError::Full(()) => {
                self.metrics
                    .rejected
                    .with_label_values(&[&shard.to_string()])
                    .inc();
                warn!(
                    signer = %request.signer,
                    shard,
                    "shard queue full, rejecting submission"
                );
                SubmitError::QueueFull
            }
            TrySendError::Closed(()) => SubmitError::ShuttingDown,
        })?;

        let receipt = Receipt::pending(
            request_id.clone(),
            request.channel_id.clone(),
            request.signer.clone(),
        );
        self.receipts.put_pending(&receipt)?;

        self.metrics
            .queue_depth
            .with_label_values(&[&shard.to_string()])
            .inc();
        debug!(request_id = %request_id, shard, "transaction queued");
        permit.send(request);
        Ok(request_id)
    }

    /// Execute a transaction inline and wait for the result; the
    /// synchronous submission path. No receipt is stored, the caller gets
    /// the outcome directly.
    pub async fn execute(&self, request: TxRequest) -> Result<TxResult, LedgerError> {
        Self::validate(&request).map_err(|e| LedgerError::Rpc(e.to_string()))?;
        let invoke = to_invoke(request);
        match tokio::time::timeout(self.tx_timeout, self.ledger.invoke(invoke)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.tx_timeout)),
        }
    }

    /// Evaluate a read-only transaction against the ledger.
    pub async fn query(&self, request: TxRequest) -> Result<Vec<u8>, LedgerError> {
        Self::validate(&request).map_err(|e| LedgerError::Rpc(e.to_string()))?;
        let invoke = to_invoke(request);
        match tokio::time::timeout(self.tx_timeout, self.ledger.query(invoke)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.tx_timeout)),
        }
    }

    fn validate(request: &TxRequest) -> Result<(), SubmitError> {
        if request.signer.is_empty() {
            return Err(SubmitError::Invalid("signer"));
        }
        if request.channel_id.is_empty() {
            return Err(SubmitError::Invalid("channelId"));
        }
        if request.chaincode_id.is_empty() {
            return Err(SubmitError::Invalid("chaincodeId"));
        }
        if request.method.is_empty() {
            return Err(SubmitError::Invalid("method"));
        }
        Ok(())
    }
}

fn to_invoke(request: TxRequest) -> InvokeRequest {
    InvokeRequest {
        signer: request.signer,
        channel_id: request.channel_id,
        chaincode_id: request.chaincode_id,
        method: request.method,
        args: request.args,
        transient_map: request.transient_map,
        is_init: request.is_init,
    }
}

fn shard_for(signer: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    signer.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

/// One shard of the pool: consumes its queue serially, which is what
/// preserves per-signer FIFO end to end.
struct Worker {
    index: usize,
    ledger: Arc<dyn LedgerClient>,
    receipts: ReceiptStore,
    ws: WsServer,
    tx_timeout: Duration,
    rx_job: mpsc::Receiver<TxRequest>,
    metrics: Arc<DispatcherMetrics>,
}

impl Worker {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some(request) = self.rx_job.recv().await {
            self.metrics
                .queue_depth
                .with_label_values(&[&self.index.to_string()])
                .dec();
            self.process(request).await;
        }
        debug!(shard = self.index, "dispatcher worker exiting");
    }

    async fn process(&self, request: TxRequest) {
        let request_id = request.request_id.clone();
        let invoke = to_invoke(request);
        debug!(
            request_id = %request_id,
            shard = self.index,
            method = %invoke.method,
            "submitting transaction"
        );

        let (status, result, message) =
            match tokio::time::timeout(self.tx_timeout, self.ledger.invoke(invoke)).await {
                Ok(Ok(tx_result)) => (ReceiptStatus::Success, Some(tx_result.to_json()), None),
                Ok(Err(e)) => {
                    warn!(request_id = %request_id, "transaction failed: {e}");
                    (ReceiptStatus::Failed, None, Some(e.to_string()))
                }
                Err(_) => {
                    warn!(request_id = %request_id, "transaction timed out");
                    (
                        ReceiptStatus::Failed,
                        None,
                        Some(format!(
                            "transaction did not complete within {:?}",
                            self.tx_timeout
                        )),
                    )
                }
            };

        match self.receipts.complete(&request_id, status, result, message) {
            Ok(receipt) => {
                self.metrics
                    .receipts
                    .with_label_values(&[receipt.status.header_type()])
                    .inc();
                let body = serde_json::to_value(&receipt).expect("receipts serialize");
                self.ws.publish_reply(body);
            }
            Err(e) => error!(request_id = %request_id, "failed to store receipt: {e}"),
        }
    }
}
