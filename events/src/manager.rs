// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{
    adapter::{AdapterCommand, BlockStreamAdapter},
    metrics::EventMetrics,
    sink::StreamSink,
    stream::{EventStream, StreamCommand, StreamHandle, StreamState},
    subscription::Subscription,
    EventsError,
};
use ledger::LedgerClient;
use parking_lot::Mutex;
use serde::Serialize;
use store::Map;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::mpsc, sync::oneshot, task::JoinHandle};
use tracing::{info, warn};
use types::{
    FromBlock, StreamDefinition, StreamKind, StreamUpdate, SubscriptionInfo, ValidationError,
};
use ws::WsServer;

#[cfg(test)]
#[path = "tests/manager_tests.rs"]
pub mod manager_tests;

/// A stream definition together with its runtime state, as reported on the
/// management API.
#[derive(Serialize)]
pub struct StreamStatus {
    #[serde(flatten)]
    pub definition: StreamDefinition,
    pub status: StreamState,
}

struct StreamEntry {
    definition: StreamDefinition,
    handle: StreamHandle,
    join: JoinHandle<()>,
}

struct AdapterEntry {
    tx_command: mpsc::Sender<AdapterCommand>,
    sub_ids: HashSet<String>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    streams: HashMap<String, StreamEntry>,
    adapters: HashMap<String, AdapterEntry>,
}

/// Lifecycle owner for streams, subscriptions and the block stream
/// adapters they share. Persisted records are the source of truth; the
/// in-memory registry tracks the running tasks and is guarded by a single
/// lock taken only around map mutations.
pub struct SubscriptionManager {
    subscriptions: store::DBMap<SubscriptionInfo>,
    streams_store: store::DBMap<StreamDefinition>,
    checkpoints: store::CheckpointStore,
    ledger: Arc<dyn LedgerClient>,
    ws: WsServer,
    metrics: Arc<EventMetrics>,
    resubscribe_delay: Duration,
    registry: Mutex<Registry>,
}

impl SubscriptionManager {
    pub fn new(
        subscriptions: store::DBMap<SubscriptionInfo>,
        streams_store: store::DBMap<StreamDefinition>,
        checkpoints: store::CheckpointStore,
        ledger: Arc<dyn LedgerClient>,
        ws: WsServer,
        metrics: Arc<EventMetrics>,
        resubscribe_delay: Duration,
    ) -> Self {
        SubscriptionManager {
            subscriptions,
            streams_store,
            checkpoints,
            ledger,
            ws,
            metrics,
            resubscribe_delay,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Rebuild every persisted stream and subscription on startup.
    /// Subscriptions referencing a missing stream are logged and skipped.
    pub async fn load(&self) -> Result<(), EventsError> {
        let definitions: Vec<StreamDefinition> =
            self.streams_store.iter().map(|(_, d)| d).collect();
        let stream_count = definitions.len();
        for definition in definitions {
            self.start_stream_runtime(definition)?;
        }

        let infos: Vec<SubscriptionInfo> = self.subscriptions.iter().map(|(_, s)| s).collect();
        let mut attached = 0usize;
        for info in infos {
            if !self.has_stream(&info.stream_id) {
                warn!(
                    sub = %info.id,
                    stream = %info.stream_id,
                    "subscription references a missing stream, skipping orphan"
                );
                continue;
            }
            match self.attach(info.clone()).await {
                Ok(()) => attached += 1,
                Err(e) => warn!(sub = %info.id, "failed to attach persisted subscription: {e}"),
            }
        }
        info!(
            streams = stream_count,
            subscriptions = attached,
            "subscription manager loaded"
        );
        Ok(())
    }

    pub async fn create_stream(
        &self,
        mut definition: StreamDefinition,
    ) -> Result<StreamDefinition, EventsError> {
        definition.id = format!("es-{}", types::new_id());
        definition.created = types::now_rfc3339();
        definition.validate()?;
        self.streams_store.insert(&definition.id, &definition)?;
        self.start_stream_runtime(definition.clone())?;
        Ok(definition)
    }

    pub fn get_stream(&self, id: &str) -> Result<StreamStatus, EventsError> {
        let registry = self.registry.lock();
        let entry = registry
            .streams
            .get(id)
            .ok_or_else(|| EventsError::StreamNotFound(id.to_string()))?;
        let status = StreamStatus {
            definition: entry.definition.clone(),
            status: *entry.handle.state.borrow(),
        };
        Ok(status)
    }

    pub fn list_streams(&self) -> Vec<StreamStatus> {
        let registry = self.registry.lock();
        let mut streams: Vec<StreamStatus> = registry
            .streams
            .values()
            .map(|entry| StreamStatus {
                definition: entry.definition.clone(),
                status: *entry.handle.state.borrow(),
            })
            .collect();
        streams.sort_by(|a, b| a.definition.id.cmp(&b.definition.id));
        streams
    }

    pub async fn update_stream(
        &self,
        id: &str,
        update: StreamUpdate,
    ) -> Result<StreamDefinition, EventsError> {
        let (handle, definition) = {
            let mut registry = self.registry.lock();
            let entry = registry
                .streams
                .get_mut(id)
                .ok_or_else(|| EventsError::StreamNotFound(id.to_string()))?;
            update.apply(&mut entry.definition);
            (entry.handle.clone(), entry.definition.clone())
        };
        self.streams_store.insert(id, &definition)?;
        let _ = handle
            .tx_command
            .send(StreamCommand::UpdateConfig(Box::new(definition.clone())))
            .await;
        Ok(definition)
    }

    pub async fn suspend_stream(&self, id: &str) -> Result<(), EventsError> {
        let handle = self.stream_handle(id)?;
        let (reply, done) = oneshot::channel();
        handle
            .tx_command
            .send(StreamCommand::Suspend { reply })
            .await
            .map_err(|_| EventsError::StreamNotFound(id.to_string()))?;
        let _ = done.await;
        info!(stream = id, "stream suspended");
        Ok(())
    }

    pub async fn resume_stream(&self, id: &str) -> Result<(), EventsError> {
        let handle = self.stream_handle(id)?;
        handle
            .tx_command
            .send(StreamCommand::Resume)
            .await
            .map_err(|_| EventsError::StreamNotFound(id.to_string()))?;
        info!(stream = id, "stream resumed");
        Ok(())
    }

    /// Delete a stream with no subscriptions attached.
    pub async fn delete_stream(&self, id: &str) -> Result<(), EventsError> {
        if self.subscriptions.iter().any(|(_, s)| s.stream_id == id) {
            return Err(EventsError::StreamBusy(id.to_string()));
        }
        let entry = {
            let mut registry = self.registry.lock();
            registry
                .streams
                .remove(id)
                .ok_or_else(|| EventsError::StreamNotFound(id.to_string()))?
        };
        let _ = entry.handle.tx_command.send(StreamCommand::Shutdown).await;
        let _ = entry.join.await;
        self.streams_store.remove(id)?;
        info!(stream = id, "stream deleted");
        Ok(())
    }

    pub async fn create_subscription(
        &self,
        mut info: SubscriptionInfo,
    ) -> Result<SubscriptionInfo, EventsError> {
        info.id = format!("sb-{}", types::new_id());
        info.created = types::now_rfc3339();
        if info.name.is_empty() {
            info.name = info.id.clone();
        }
        info.validate()?;
        // Compile the event filter before anything is persisted so a bad
        // regex cannot leave a dead record behind.
        Subscription::new(info.clone())?;
        if !self.has_stream(&info.stream_id) {
            return Err(EventsError::StreamNotFound(info.stream_id));
        }
        self.subscriptions.insert(&info.id, &info)?;
        self.attach(info.clone()).await?;
        Ok(info)
    }

    pub fn get_subscription(&self, id: &str) -> Result<SubscriptionInfo, EventsError> {
        self.subscriptions
            .get(id)?
            .ok_or_else(|| EventsError::SubscriptionNotFound(id.to_string()))
    }

    pub fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.iter().map(|(_, s)| s).collect()
    }

    /// Delete a subscription and its checkpoint.
    pub async fn delete_subscription(&self, id: &str) -> Result<(), EventsError> {
        let info = self.get_subscription(id)?;
        self.detach(&info).await;
        self.subscriptions.remove(id)?;
        self.checkpoints.delete(id)?;
        info!(sub = id, "subscription deleted");
        Ok(())
    }

    /// Rewrite a subscription's checkpoint. Only accepted while its stream
    /// is suspended, so no in-flight batch can race the rewritten cursor.
    pub async fn reset_subscription(
        &self,
        id: &str,
        from_block: FromBlock,
    ) -> Result<(), EventsError> {
        let info = self.get_subscription(id)?;
        let state = self.stream_state(&info.stream_id)?;
        if !matches!(state, StreamState::Suspended | StreamState::Failed) {
            return Err(EventsError::StreamNotSuspended(info.stream_id));
        }

        let cursor = self.initial_cursor(&info.channel_id, from_block).await?;
        self.detach(&info).await;
        self.checkpoints.reset(id, cursor)?;

        // Persist the new fromBlock so a restart before the next
        // checkpoint write resumes from the same place.
        let mut updated = info;
        updated.from_block = from_block;
        self.subscriptions.insert(id, &updated)?;
        self.attach(updated).await?;
        info!(sub = id, %from_block, "subscription reset");
        Ok(())
    }

    pub fn stream_state(&self, id: &str) -> Result<StreamState, EventsError> {
        let registry = self.registry.lock();
        registry
            .streams
            .get(id)
            .map(|entry| *entry.handle.state.borrow())
            .ok_or_else(|| EventsError::StreamNotFound(id.to_string()))
    }

    /// Stop every stream loop and adapter task.
    pub async fn shutdown(&self) {
        let (streams, adapters) = {
            let mut registry = self.registry.lock();
            (
                registry.streams.drain().collect::<Vec<_>>(),
                registry.adapters.drain().collect::<Vec<_>>(),
            )
        };
        // Streams first: a stopped stream drops its event receiver, which
        // unblocks any adapter parked on a full sink before we join it.
        for (_, entry) in streams {
            let _ = entry.handle.tx_command.send(StreamCommand::Shutdown).await;
            let _ = entry.join.await;
        }
        for (_, entry) in adapters {
            // Dropping the command sender stops the adapter loop.
            drop(entry.tx_command);
            let _ = entry.join.await;
        }
        info!("subscription manager shut down");
    }

    fn has_stream(&self, id: &str) -> bool {
        self.registry.lock().streams.contains_key(id)
    }

    fn stream_handle(&self, id: &str) -> Result<StreamHandle, EventsError> {
        self.registry
            .lock()
            .streams
            .get(id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| EventsError::StreamNotFound(id.to_string()))
    }

    fn start_stream_runtime(
        &self,
        definition: StreamDefinition,
    ) -> Result<StreamHandle, EventsError> {
        let sink = match definition.kind {
            StreamKind::WebSocket => {
                let topic = definition
                    .topic()
                    .ok_or(ValidationError::MissingField("websocket.topic"))?;
                StreamSink::websocket(self.ws.sender(topic))
            }
            StreamKind::Webhook => {
                let webhook = definition
                    .webhook
                    .as_ref()
                    .ok_or(ValidationError::MissingField("webhook.url"))?;
                StreamSink::webhook(
                    &webhook.url,
                    Duration::from_secs(webhook.request_timeout_sec),
                )?
            }
        };
        let (handle, join) = EventStream::spawn(
            definition.clone(),
            sink,
            self.checkpoints.clone(),
            self.metrics.clone(),
        );
        self.registry.lock().streams.insert(
            definition.id.clone(),
            StreamEntry {
                definition,
                handle: handle.clone(),
                join,
            },
        );
        Ok(handle)
    }

    /// Resume-or-start position for a subscription: an existing checkpoint
    /// always wins over `fromBlock`.
    async fn resume_cursor(&self, info: &SubscriptionInfo) -> Result<u64, EventsError> {
        if let Some(checkpoint) = self.checkpoints.get(&info.id)? {
            return Ok(checkpoint);
        }
        self.initial_cursor(&info.channel_id, info.from_block).await
    }

    async fn initial_cursor(
        &self,
        channel_id: &str,
        from_block: FromBlock,
    ) -> Result<u64, EventsError> {
        match from_block {
            FromBlock::Oldest => Ok(0),
            FromBlock::Number(n) => Ok(n),
            FromBlock::Newest => Ok(self.ledger.chain_height(channel_id).await?),
        }
    }

    async fn attach(&self, info: SubscriptionInfo) -> Result<(), EventsError> {
        let handle = self.stream_handle(&info.stream_id)?;
        let cursor = self.resume_cursor(&info).await?;
        let sub = Subscription::new(info.clone())?;
        handle
            .tx_command
            .send(StreamCommand::Attach { sub, cursor })
            .await
            .map_err(|_| EventsError::StreamNotFound(info.stream_id.clone()))?;

        let tx_adapter = self.adapter_for(&info);
        tx_adapter
            .send(AdapterCommand::Register {
                sub_id: info.id.clone(),
                from_block: cursor,
                sink: handle.tx_events.clone(),
            })
            .await
            .map_err(|_| EventsError::SubscriptionNotFound(info.id.clone()))?;
        Ok(())
    }

    async fn detach(&self, info: &SubscriptionInfo) {
        if let Ok(handle) = self.stream_handle(&info.stream_id) {
            let _ = handle
                .tx_command
                .send(StreamCommand::Detach {
                    sub_id: info.id.clone(),
                })
                .await;
        }

        let key = info.event_client_key();
        let tx_unregister = {
            let mut registry = self.registry.lock();
            match registry.adapters.get_mut(&key) {
                Some(entry) => {
                    entry.sub_ids.remove(&info.id);
                    if entry.sub_ids.is_empty() {
                        // Dropping the entry closes the command channel and
                        // stops the adapter with its ledger subscription.
                        registry.adapters.remove(&key);
                        None
                    } else {
                        Some(entry.tx_command.clone())
                    }
                }
                None => None,
            }
        };
        if let Some(tx) = tx_unregister {
            let _ = tx
                .send(AdapterCommand::Unregister {
                    sub_id: info.id.clone(),
                })
                .await;
        }
    }

    fn adapter_for(&self, info: &SubscriptionInfo) -> mpsc::Sender<AdapterCommand> {
        let key = info.event_client_key();
        let mut registry = self.registry.lock();
        let entry = registry.adapters.entry(key).or_insert_with(|| {
            let (tx_command, join) = BlockStreamAdapter::spawn(
                info.channel_id.clone(),
                info.filter.chaincode_id.clone().unwrap_or_default(),
                self.ledger.clone(),
                self.resubscribe_delay,
            );
            AdapterEntry {
                tx_command,
                sub_ids: HashSet::new(),
                join,
            }
        });
        entry.sub_ids.insert(info.id.clone());
        entry.tx_command.clone()
    }
}
