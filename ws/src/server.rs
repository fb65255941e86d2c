// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::WsError;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered receipts a `listenreplies` subscriber may fall behind by before
/// it starts missing them.
const REPLIES_CAPACITY: usize = 1_024;

/// A connection registered as a listener on a topic. The frame channel has
/// capacity one: a listener holds at most the topic's single in-flight
/// message.
#[derive(Clone)]
pub(crate) struct Listener {
    pub connection_id: Uuid,
    pub tx_frame: mpsc::Sender<String>,
    pub cancel: CancellationToken,
}

pub(crate) struct Topic {
    name: String,
    /// Senders publish here; capacity one keeps a single batch in flight.
    tx_message: mpsc::Sender<Value>,
    /// Client acks and errors come back here, consumed by the one sender
    /// awaiting its in-flight message.
    tx_reply: mpsc::Sender<Result<(), String>>,
    rx_reply: Arc<tokio::sync::Mutex<mpsc::Receiver<Result<(), String>>>>,
    /// The listener at the front is the active one; the rest wait their
    /// turn and move up as earlier listeners disconnect or time out.
    listeners: Mutex<VecDeque<Listener>>,
    listener_added: Arc<tokio::sync::Notify>,
}

impl Topic {
    pub(crate) fn remove_listener(&self, connection_id: Uuid) {
        self.listeners
            .lock()
            .retain(|l| l.connection_id != connection_id);
    }

    /// Close the active listener and promote the next one.
    fn cycle(&self) {
        let removed = self.listeners.lock().pop_front();
        if let Some(listener) = removed {
            warn!(
                topic = %self.name,
                connection_id = %listener.connection_id,
                "closing unresponsive topic listener"
            );
            listener.cancel.cancel();
        }
    }
}

pub(crate) struct Inner {
    pub topics: Mutex<HashMap<String, Arc<Topic>>>,
    pub replies: broadcast::Sender<Value>,
    pub processing_timeout: Duration,
    pub shutdown: watch::Sender<bool>,
}

impl Inner {
    pub(crate) fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock();
        if let Some(topic) = topics.get(name) {
            return topic.clone();
        }

        let (tx_message, rx_message) = mpsc::channel(1);
        let (tx_reply, rx_reply) = mpsc::channel(1);
        let topic = Arc::new(Topic {
            name: name.to_string(),
            tx_message,
            tx_reply,
            rx_reply: Arc::new(tokio::sync::Mutex::new(rx_reply)),
            listeners: Mutex::new(VecDeque::new()),
            listener_added: Arc::new(tokio::sync::Notify::new()),
        });
        topics.insert(name.to_string(), topic.clone());
        debug!(topic = name, "created websocket topic");

        tokio::spawn(route_topic(
            topic.clone(),
            rx_message,
            self.shutdown.subscribe(),
        ));
        topic
    }

    pub(crate) fn listen_on(&self, topic_name: &str, listener: Listener) {
        let topic = self.topic(topic_name);
        info!(
            topic = topic_name,
            connection_id = %listener.connection_id,
            "connection listening on topic"
        );
        topic.listeners.lock().push_back(listener);
        // notify_one stores a permit, so a router not yet parked still
        // observes the arrival.
        topic.listener_added.notify_one();
    }

    /// Route a client ack or error to whoever is awaiting the topic's
    /// in-flight message. If nobody takes it within the processing timeout
    /// the connection that sent it is closed.
    pub(crate) async fn route_reply(
        &self,
        topic_name: &str,
        reply: Result<(), String>,
        from: &CancellationToken,
        connection_id: Uuid,
    ) {
        let tx_reply = {
            let topics = self.topics.lock();
            match topics.get(topic_name) {
                Some(topic) => topic.tx_reply.clone(),
                None => {
                    warn!(topic = topic_name, "reply for unknown topic discarded");
                    return;
                }
            }
        };
        let is_error = reply.is_err();
        tokio::select! {
            result = tx_reply.send(reply) => {
                if result.is_err() {
                    warn!(topic = topic_name, "reply channel closed, discarding");
                } else {
                    debug!(topic = topic_name, is_error, "client reply passed on");
                }
            }
            _ = tokio::time::sleep(self.processing_timeout) => {
                warn!(
                    topic = topic_name,
                    connection_id = %connection_id,
                    timeout = ?self.processing_timeout,
                    "nobody processed the client reply in time, closing connection"
                );
                from.cancel();
            }
        }
    }

    pub(crate) fn remove_connection(&self, connection_id: Uuid) {
        let topics = self.topics.lock();
        for topic in topics.values() {
            topic.remove_listener(connection_id);
        }
    }
}

/// Forward each published message to the topic's active listener, waiting
/// for one to appear when none is registered and rotating past listeners
/// whose connection has gone away.
async fn route_topic(
    topic: Arc<Topic>,
    mut rx_message: mpsc::Receiver<Value>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let body = tokio::select! {
            maybe = rx_message.recv() => match maybe {
                Some(body) => body,
                None => break,
            },
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let frame = body.to_string();
        'deliver: loop {
            let front = topic.listeners.lock().front().cloned();
            let Some(listener) = front else {
                // Park until a client starts listening on this topic.
                tokio::select! {
                    _ = topic.listener_added.notified() => continue 'deliver,
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            return;
                        }
                        continue 'deliver;
                    }
                }
            };
            if listener.tx_frame.send(frame.clone()).await.is_err() {
                topic.remove_listener(listener.connection_id);
                continue 'deliver;
            }
            break 'deliver;
        }
    }
    debug!(topic = %topic.name, "topic router exiting");
}

/// The fan-out server shared by the event streams (topic publication with
/// acknowledgements) and the transaction dispatcher (receipt replies).
#[derive(Clone)]
pub struct WsServer {
    pub(crate) inner: Arc<Inner>,
}

impl WsServer {
    pub fn new(processing_timeout: Duration) -> Self {
        let (replies, _) = broadcast::channel(REPLIES_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        WsServer {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                replies,
                processing_timeout,
                shutdown,
            }),
        }
    }

    /// The sending side of a topic: publish a message, await the client's
    /// ack or error. One in-flight message per topic.
    pub fn sender(&self, topic: &str) -> TopicSender {
        let topic = self.inner.topic(topic);
        TopicSender {
            topic_name: topic.name.clone(),
            tx_message: topic.tx_message.clone(),
            rx_reply: topic.rx_reply.clone(),
            server: self.inner.clone(),
        }
    }

    /// Publish a receipt to every `listenreplies` subscriber. Nobody
    /// listening is not an error.
    pub fn publish_reply(&self, receipt: Value) {
        if self.inner.replies.receiver_count() > 0 {
            let _ = self.inner.replies.send(receipt);
        }
    }

    /// Subscribe to the replies topic directly, without a socket.
    pub fn subscribe_replies(&self) -> broadcast::Receiver<Value> {
        self.inner.replies.subscribe()
    }

    /// Handle an upgraded socket until it closes; called from the HTTP
    /// layer's `GET /ws` route.
    pub async fn handle_socket(&self, socket: axum::extract::ws::WebSocket) {
        crate::connection::handle_socket(self.inner.clone(), socket).await;
    }

    /// Close every connection and topic router.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }
}

/// The stream-facing handle for one topic.
#[derive(Clone)]
pub struct TopicSender {
    topic_name: String,
    tx_message: mpsc::Sender<Value>,
    rx_reply: Arc<tokio::sync::Mutex<mpsc::Receiver<Result<(), String>>>>,
    server: Arc<Inner>,
}

impl TopicSender {
    pub fn topic(&self) -> &str {
        &self.topic_name
    }

    /// Publish `body` on the topic and wait for the listening client's
    /// reply frame. On timeout the active listener is closed and the next
    /// one becomes eligible for the retry.
    pub async fn deliver(&self, body: Value) -> Result<(), WsError> {
        let mut rx_reply = self.rx_reply.lock().await;
        // Drop any reply left over from a previously timed-out delivery so
        // it cannot be mistaken for this one's.
        while rx_reply.try_recv().is_ok() {}

        // A full queue means an identical copy of this message is already
        // waiting (only retries of the same batch can refill the
        // capacity-one slot), so coalesce instead of blocking.
        match self.tx_message.try_send(body) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(WsError::Closed),
        }

        match tokio::time::timeout(self.server.processing_timeout, rx_reply.recv()).await {
            Ok(Some(Ok(()))) => Ok(()),
            Ok(Some(Err(message))) => Err(WsError::ClientError(message)),
            Ok(None) => Err(WsError::Closed),
            Err(_) => {
                if let Some(topic) = self.server.topics.lock().get(&self.topic_name) {
                    topic.cycle();
                }
                Err(WsError::AckTimeout(self.server.processing_timeout))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/server_tests.rs"]
pub mod server_tests;
