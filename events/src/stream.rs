// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{
    metrics::EventMetrics, sink::StreamSink, subscription::Subscription, StreamItem,
};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};
use types::{ErrorHandling, EventRecord, StreamDefinition};

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
pub mod stream_tests;

/// Decoded events buffered between the adapters and an unacknowledged
/// batch. When full, the adapters feel backpressure.
const EVENTS_CAPACITY: usize = 1_024;
const COMMAND_CAPACITY: usize = 16;

pub enum StreamCommand {
    /// Attach a subscription whose next undelivered block is `cursor`.
    Attach { sub: Subscription, cursor: u64 },
    Detach {
        sub_id: String,
    },
    /// Park the dispatch loop. The reply fires once any in-flight batch
    /// has completed or failed and the loop is parked.
    Suspend {
        reply: oneshot::Sender<()>,
    },
    Resume,
    /// Non-destructive reconfiguration (batching and retry knobs).
    UpdateConfig(Box<StreamDefinition>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Starting,
    Running,
    /// No subscriptions attached; the loop is parked with no adapter
    /// pressure.
    Idle,
    Suspended,
    /// Suspended by a checkpoint persistence failure.
    Failed,
    Terminated,
}

/// What the manager holds to drive a running stream.
#[derive(Clone)]
pub struct StreamHandle {
    pub id: String,
    pub tx_command: mpsc::Sender<StreamCommand>,
    /// Cloned into every adapter registration for this stream's
    /// subscriptions.
    pub tx_events: mpsc::Sender<StreamItem>,
    pub state: watch::Receiver<StreamState>,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

struct SubState {
    sub: Subscription,
    /// Highest block for which every event has been forwarded by the
    /// adapter; `None` until the first block-complete marker (or resume
    /// position) is known.
    complete_through: Option<u64>,
}

/// The dispatch loop owner for all subscriptions sharing one delivery
/// sink: batch, deliver, await the acknowledgement, advance checkpoints,
/// repeat. At most one loop runs per stream and one batch is in flight at
/// a time.
pub struct EventStream {
    definition: StreamDefinition,
    checkpoints: store::CheckpointStore,
    sink: StreamSink,
    metrics: Arc<EventMetrics>,
    rx_command: mpsc::Receiver<StreamCommand>,
    rx_events: mpsc::Receiver<StreamItem>,
    tx_state: watch::Sender<StreamState>,
    subs: HashMap<String, SubState>,
    /// Candidates awaiting batching, in adapter arrival order, which is
    /// cursor order within each subscription.
    ready: VecDeque<EventRecord>,
    suspended: bool,
}

impl EventStream {
    #[must_use]
    pub fn spawn(
        definition: StreamDefinition,
        sink: StreamSink,
        checkpoints: store::CheckpointStore,
        metrics: Arc<EventMetrics>,
    ) -> (StreamHandle, JoinHandle<()>) {
        let (tx_command, rx_command) = mpsc::channel(COMMAND_CAPACITY);
        let (tx_events, rx_events) = mpsc::channel(EVENTS_CAPACITY);
        let (tx_state, rx_state) = watch::channel(StreamState::Starting);
        let handle = StreamHandle {
            id: definition.id.clone(),
            tx_command,
            tx_events,
            state: rx_state,
        };

        let join = tokio::spawn(async move {
            Self {
                definition,
                checkpoints,
                sink,
                metrics,
                rx_command,
                rx_events,
                tx_state,
                subs: HashMap::new(),
                ready: VecDeque::new(),
                suspended: false,
            }
            .run()
            .await;
        });
        (handle, join)
    }

    /// Main dispatch loop. A batch is sealed when it reaches `batchSize`,
    /// or when the batch timer fires with at least one candidate waiting.
    async fn run(&mut self) {
        info!(
            stream = %self.definition.id,
            sink = self.sink.kind(),
            "event stream starting"
        );
        self.set_state(StreamState::Idle);

        let timer = sleep(self.batch_timeout());
        tokio::pin!(timer);

        loop {
            let batch_size = self.definition.batch_size as usize;
            let sealable = !self.ready.is_empty()
                && (self.ready.len() >= batch_size || timer.is_elapsed());
            if !self.suspended && sealable {
                if self.deliver_batch().await == Flow::Stop {
                    break;
                }
                timer.as_mut().reset(Instant::now() + self.batch_timeout());
                continue;
            }

            tokio::select! {
                command = self.rx_command.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command) == Flow::Stop {
                            break;
                        }
                    }
                    None => break,
                },

                maybe_item = self.rx_events.recv(),
                    if !self.suspended && self.ready.len() < batch_size =>
                {
                    match maybe_item {
                        Some(item) => {
                            let was_empty = self.ready.is_empty();
                            self.handle_item(item);
                            if was_empty && !self.ready.is_empty() {
                                // The batch window opens with its first event.
                                timer.as_mut().reset(Instant::now() + self.batch_timeout());
                            }
                        }
                        None => break,
                    }
                }

                // Wake up to seal a partial batch.
                () = &mut timer, if !self.suspended && !self.ready.is_empty() => {}
            }
        }

        self.set_state(StreamState::Terminated);
        info!(stream = %self.definition.id, "event stream terminated");
    }

    fn handle_command(&mut self, command: StreamCommand) -> Flow {
        match command {
            StreamCommand::Attach { sub, cursor } => {
                info!(
                    stream = %self.definition.id,
                    sub = sub.id(),
                    cursor,
                    "subscription attached"
                );
                self.metrics.attached_subscriptions.inc();
                self.subs.insert(
                    sub.id().to_string(),
                    SubState {
                        sub,
                        complete_through: cursor.checked_sub(1),
                    },
                );
                if !self.suspended {
                    self.set_state(StreamState::Running);
                }
                Flow::Continue
            }
            StreamCommand::Detach { sub_id } => {
                if self.subs.remove(&sub_id).is_some() {
                    self.metrics.attached_subscriptions.dec();
                }
                self.ready.retain(|record| record.sub_id != sub_id);
                if self.subs.is_empty() && !self.suspended {
                    self.set_state(StreamState::Idle);
                }
                Flow::Continue
            }
            StreamCommand::Suspend { reply } => {
                self.suspended = true;
                self.set_state(StreamState::Suspended);
                let _ = reply.send(());
                Flow::Continue
            }
            StreamCommand::Resume => {
                if self.suspended {
                    self.suspended = false;
                    self.set_state(if self.subs.is_empty() {
                        StreamState::Idle
                    } else {
                        StreamState::Running
                    });
                }
                Flow::Continue
            }
            StreamCommand::UpdateConfig(definition) => {
                debug!(stream = %self.definition.id, "stream configuration updated");
                self.definition = *definition;
                Flow::Continue
            }
            StreamCommand::Shutdown => Flow::Stop,
        }
    }

    fn handle_item(&mut self, item: StreamItem) {
        match item {
            StreamItem::Event(routed) => {
                let Some(state) = self.subs.get(&routed.sub_id) else {
                    // A late event for a detached subscription.
                    return;
                };
                if !state.sub.matches(routed.block_kind, &routed.event) {
                    return;
                }
                let payload = match state.sub.render(&routed.event.payload) {
                    Ok(payload) => payload,
                    Err(fallback) => match self.definition.error_handling {
                        ErrorHandling::Skip => {
                            warn!(
                                stream = %self.definition.id,
                                sub = %routed.sub_id,
                                event = %routed.event.event_name,
                                "dropping event with undecodable json payload"
                            );
                            return;
                        }
                        ErrorHandling::Block => {
                            warn!(
                                stream = %self.definition.id,
                                sub = %routed.sub_id,
                                event = %routed.event.event_name,
                                "delivering undecodable json payload as raw bytes"
                            );
                            fallback
                        }
                    },
                };
                let timestamp = if self.definition.timestamps {
                    routed.event.timestamp
                } else {
                    None
                };
                self.ready.push_back(EventRecord {
                    chaincode_id: routed.event.chaincode_id,
                    block_number: routed.block_number,
                    transaction_id: routed.event.transaction_id,
                    transaction_index: routed.event.transaction_index,
                    event_index: routed.event.event_index,
                    event_name: routed.event.event_name,
                    payload,
                    timestamp,
                    sub_id: routed.sub_id,
                });
            }
            StreamItem::BlockComplete { sub_id, block } => {
                if let Some(state) = self.subs.get_mut(&sub_id) {
                    state.complete_through =
                        Some(state.complete_through.map_or(block, |c| c.max(block)));
                    self.advance_checkpoint(&sub_id);
                }
            }
            StreamItem::LedgerError { message } => {
                warn!(
                    stream = %self.definition.id,
                    "ledger error surfaced on stream: {message}"
                );
            }
        }
    }

    /// Seal the next batch, deliver it, and repeat the delivery on failure
    /// per the stream's `errorHandling`. The batch is re-sent identically
    /// until acknowledged or the stream is suspended.
    async fn deliver_batch(&mut self) -> Flow {
        let batch_size = self.definition.batch_size as usize;
        let count = batch_size.min(self.ready.len());
        let mut batch: Vec<EventRecord> = self.ready.drain(..count).collect();
        // Deterministic emission order across interleaved subscriptions;
        // within one subscription this is its cursor order already.
        batch.sort_by(|a, b| a.emission_key().cmp(&b.emission_key()));
        debug!(
            stream = %self.definition.id,
            events = batch.len(),
            "dispatching batch"
        );

        loop {
            match self.sink.deliver(&batch).await {
                Ok(()) => {
                    self.metrics
                        .batches_delivered
                        .with_label_values(&[&self.definition.id])
                        .inc();
                    self.metrics
                        .events_delivered
                        .with_label_values(&[&self.definition.id])
                        .inc_by(batch.len() as u64);
                    self.finish_batch(&batch);
                    return Flow::Continue;
                }
                Err(e) => {
                    self.metrics
                        .delivery_failures
                        .with_label_values(&[&self.definition.id])
                        .inc();
                    match self.definition.error_handling {
                        ErrorHandling::Skip => {
                            warn!(
                                stream = %self.definition.id,
                                "batch delivery failed ({e}), skipping per errorHandling"
                            );
                            // Checkpoints move as if the batch were acked.
                            self.finish_batch(&batch);
                            return Flow::Continue;
                        }
                        ErrorHandling::Block => {
                            let delay =
                                Duration::from_secs(self.definition.blocked_retry_delay_sec);
                            warn!(
                                stream = %self.definition.id,
                                "batch delivery failed ({e}), retrying in {delay:?}"
                            );
                            let retry_at = sleep(delay);
                            tokio::pin!(retry_at);
                            loop {
                                tokio::select! {
                                    () = &mut retry_at => break,
                                    command = self.rx_command.recv() => match command {
                                        Some(command) => {
                                            if self.handle_command(command) == Flow::Stop {
                                                return Flow::Stop;
                                            }
                                            if self.suspended {
                                                // Requeue the failed batch at the
                                                // front so a resume retries it
                                                // first, in order.
                                                for record in batch.drain(..).rev() {
                                                    self.ready.push_front(record);
                                                }
                                                return Flow::Continue;
                                            }
                                        }
                                        None => return Flow::Stop,
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Advance the checkpoint of every subscription the acknowledged batch
    /// touched.
    fn finish_batch(&mut self, batch: &[EventRecord]) {
        let touched: HashSet<String> = batch.iter().map(|r| r.sub_id.clone()).collect();
        for sub_id in &touched {
            self.advance_checkpoint(sub_id);
        }
    }

    /// Move `sub_id`'s checkpoint to the highest safe position: past every
    /// fully-forwarded block, but never past a block with an undelivered
    /// candidate still waiting. Partial-block acknowledgements therefore
    /// hold the checkpoint at that block.
    fn advance_checkpoint(&mut self, sub_id: &str) {
        let Some(state) = self.subs.get(sub_id) else {
            return;
        };
        let next_pending = self
            .ready
            .iter()
            .filter(|record| record.sub_id == sub_id)
            .map(|record| record.block_number)
            .min();
        let target = match (state.complete_through, next_pending) {
            (None, None) => return,
            (Some(complete), None) => complete + 1,
            (None, Some(pending)) => pending,
            (Some(complete), Some(pending)) => pending.min(complete + 1),
        };
        match self.checkpoints.advance(sub_id, target) {
            Ok(checkpoint) => {
                self.metrics
                    .checkpoint_block
                    .with_label_values(&[sub_id])
                    .set(checkpoint as i64);
            }
            Err(e) => {
                // Losing the cursor store means delivery positions can no
                // longer be trusted to persist; stop with a visible error.
                error!(
                    stream = %self.definition.id,
                    sub_id,
                    "checkpoint write failed, suspending stream: {e}"
                );
                self.suspended = true;
                self.set_state(StreamState::Failed);
            }
        }
    }

    fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.definition.batch_timeout_ms)
    }

    fn set_state(&self, state: StreamState) {
        self.tx_state.send_replace(state);
    }
}
