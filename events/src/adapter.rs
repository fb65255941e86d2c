// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{RoutedEvent, StreamItem};
use ledger::{BlockFeed, DecodedBlock, LedgerClient, LedgerUpdate};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "tests/adapter_tests.rs"]
pub mod adapter_tests;

const COMMAND_CAPACITY: usize = 16;

#[derive(Debug)]
pub enum AdapterCommand {
    /// Attach a per-subscription sink; delivery starts at `from_block`.
    Register {
        sub_id: String,
        from_block: u64,
        sink: mpsc::Sender<StreamItem>,
    },
    Unregister {
        sub_id: String,
    },
}

struct SinkState {
    /// The next block this sink has not yet been handed.
    cursor: u64,
    tx: mpsc::Sender<StreamItem>,
}

/// The single holder of the ledger block subscription for one
/// `(channel, chaincode)` key. Blocks arrive already decoded from the
/// ledger client; the adapter owns seek position and fan-out. The ledger
/// feed runs at the minimum of all sink cursors and every sink only sees
/// blocks at or past its own cursor, so re-seeks for a new low-cursor
/// sink never duplicate delivery to the others.
pub struct BlockStreamAdapter {
    channel_id: String,
    chaincode_id: String,
    ledger: Arc<dyn LedgerClient>,
    resubscribe_delay: Duration,
    rx_command: mpsc::Receiver<AdapterCommand>,
}

impl BlockStreamAdapter {
    #[must_use]
    pub fn spawn(
        channel_id: String,
        chaincode_id: String,
        ledger: Arc<dyn LedgerClient>,
        resubscribe_delay: Duration,
    ) -> (mpsc::Sender<AdapterCommand>, JoinHandle<()>) {
        let (tx_command, rx_command) = mpsc::channel(COMMAND_CAPACITY);
        let handle = tokio::spawn(async move {
            Self {
                channel_id,
                chaincode_id,
                ledger,
                resubscribe_delay,
                rx_command,
            }
            .run()
            .await;
        });
        (tx_command, handle)
    }

    async fn run(mut self) {
        let mut sinks: HashMap<String, SinkState> = HashMap::new();
        let mut feed: Option<BlockFeed> = None;
        // The next block number expected from the current ledger feed.
        let mut next_block: u64 = 0;

        loop {
            tokio::select! {
                command = self.rx_command.recv() => match command {
                    Some(AdapterCommand::Register { sub_id, from_block, sink }) => {
                        debug!(
                            channel = %self.channel_id,
                            chaincode = %self.chaincode_id,
                            sub_id, from_block, "sink registered"
                        );
                        sinks.insert(sub_id, SinkState { cursor: from_block, tx: sink });
                        if feed.is_none() || from_block < next_block {
                            // Seek back (or start) at the lowest cursor; the
                            // per-sink cursor filter absorbs the replay.
                            let seek = sinks.values().map(|s| s.cursor).min().unwrap_or(from_block);
                            feed = Some(self.subscribe_until_ready(seek, &mut sinks).await);
                            next_block = seek;
                        }
                    }
                    Some(AdapterCommand::Unregister { sub_id }) => {
                        sinks.remove(&sub_id);
                        if sinks.is_empty() {
                            // Tear down the ledger subscription with the
                            // last sink.
                            feed = None;
                            info!(
                                channel = %self.channel_id,
                                chaincode = %self.chaincode_id,
                                "last sink unregistered, dropping block subscription"
                            );
                        }
                    }
                    None => break,
                },
                update = recv_or_pending(&mut feed) => match update {
                    Some(LedgerUpdate::Block(block)) => {
                        next_block = block.number + 1;
                        self.fan_out(&block, &mut sinks).await;
                    }
                    Some(LedgerUpdate::Dropped(reason)) => {
                        (feed, next_block) =
                            self.recover(reason, &mut sinks, next_block).await;
                    }
                    None => {
                        (feed, next_block) = self
                            .recover("block feed closed".to_string(), &mut sinks, next_block)
                            .await;
                    }
                },
            }
        }
        debug!(
            channel = %self.channel_id,
            chaincode = %self.chaincode_id,
            "block stream adapter exiting"
        );
    }

    /// Surface a dropped ledger subscription to every sink, then reopen it
    /// at the lowest sink cursor. Returns the new feed and seek position.
    async fn recover(
        &self,
        reason: String,
        sinks: &mut HashMap<String, SinkState>,
        next_block: u64,
    ) -> (Option<BlockFeed>, u64) {
        warn!(
            channel = %self.channel_id,
            chaincode = %self.chaincode_id,
            reason, "ledger subscription dropped, resubscribing"
        );
        for sink in sinks.values() {
            let _ = sink
                .tx
                .send(StreamItem::LedgerError {
                    message: reason.clone(),
                })
                .await;
        }
        if sinks.is_empty() {
            return (None, next_block);
        }
        sleep(self.resubscribe_delay).await;
        let seek = sinks
            .values()
            .map(|s| s.cursor)
            .min()
            .unwrap_or(next_block);
        let feed = self.subscribe_until_ready(seek, sinks).await;
        (Some(feed), seek)
    }

    /// Open the ledger subscription, retrying until it succeeds. Failures
    /// are surfaced to every sink; resumption is driven from here.
    async fn subscribe_until_ready(
        &self,
        from_block: u64,
        sinks: &mut HashMap<String, SinkState>,
    ) -> BlockFeed {
        loop {
            match self
                .ledger
                .subscribe(&self.channel_id, &self.chaincode_id, from_block)
                .await
            {
                Ok(feed) => {
                    info!(
                        channel = %self.channel_id,
                        chaincode = %self.chaincode_id,
                        from_block, "block subscription established"
                    );
                    return feed;
                }
                Err(e) => {
                    warn!(
                        channel = %self.channel_id,
                        chaincode = %self.chaincode_id,
                        "block subscription failed: {e}, retrying"
                    );
                    for sink in sinks.values() {
                        let _ = sink
                            .tx
                            .send(StreamItem::LedgerError {
                                message: e.to_string(),
                            })
                            .await;
                    }
                    sleep(self.resubscribe_delay).await;
                }
            }
        }
    }

    /// Hand one block to every sink whose cursor is at or below it: each
    /// matching event, then the block-complete marker that lets the
    /// stream's checkpoints pass event-less blocks.
    async fn fan_out(&self, block: &DecodedBlock, sinks: &mut HashMap<String, SinkState>) {
        let mut dead: Vec<String> = Vec::new();
        for (sub_id, sink) in sinks.iter_mut() {
            if block.number < sink.cursor {
                continue;
            }
            let mut delivered = true;
            for event in &block.events {
                if !self.chaincode_id.is_empty() && event.chaincode_id != self.chaincode_id {
                    continue;
                }
                let item = StreamItem::Event(RoutedEvent {
                    sub_id: sub_id.clone(),
                    block_number: block.number,
                    block_kind: block.kind,
                    event: event.clone(),
                });
                if sink.tx.send(item).await.is_err() {
                    delivered = false;
                    break;
                }
            }
            if delivered
                && sink
                    .tx
                    .send(StreamItem::BlockComplete {
                        sub_id: sub_id.clone(),
                        block: block.number,
                    })
                    .await
                    .is_err()
            {
                delivered = false;
            }
            if delivered {
                sink.cursor = block.number + 1;
            } else {
                dead.push(sub_id.clone());
            }
        }
        for sub_id in dead {
            debug!(sub_id, "sink closed, unregistering");
            sinks.remove(&sub_id);
        }
    }
}

async fn recv_or_pending(feed: &mut Option<BlockFeed>) -> Option<LedgerUpdate> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}
