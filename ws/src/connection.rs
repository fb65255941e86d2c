// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::server::{Inner, Listener};
use axum::extract::ws::{Message, WebSocket};
use futures::{
    stream::{BoxStream, SelectAll, SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::ClientCommand;
use uuid::Uuid;

/// An outbound source added to the sender's select set: a topic the
/// connection listens on, or the replies broadcast.
type OutboundSource = BoxStream<'static, String>;

/// Serve one upgraded socket until it closes. A reader task parses client
/// command frames; a sender task multiplexes every outbound source onto
/// the socket.
pub(crate) async fn handle_socket(server: Arc<Inner>, socket: WebSocket) {
    let connection_id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let (sink, stream) = socket.split();
    let (tx_new_source, rx_new_source) = mpsc::channel::<OutboundSource>(8);

    info!(connection_id = %connection_id, "websocket connection established");

    let sender = tokio::spawn(run_sender(
        sink,
        rx_new_source,
        cancel.clone(),
        server.shutdown.subscribe(),
    ));

    run_reader(
        &server,
        stream,
        tx_new_source,
        cancel.clone(),
        server.shutdown.subscribe(),
        connection_id,
    )
    .await;

    // However the reader ended, tear the whole connection down.
    cancel.cancel();
    server.remove_connection(connection_id);
    let _ = sender.await;
    info!(connection_id = %connection_id, "websocket connection closed");
}

/// Multiplex frames from every outbound source onto the socket. The select
/// set is dynamic: each `listen` / `listenreplies` command pushes a new
/// source through `rx_new_source`, rebuilding the set, which replaces the
/// original reflective select over a changing channel list.
async fn run_sender(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx_new_source: mpsc::Receiver<OutboundSource>,
    cancel: CancellationToken,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut sources: SelectAll<OutboundSource> = SelectAll::new();
    loop {
        tokio::select! {
            maybe_source = rx_new_source.recv() => match maybe_source {
                Some(source) => sources.push(source),
                None => break,
            },
            Some(frame) = sources.next(), if !sources.is_empty() => {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    debug!("websocket send failed: {e}");
                    break;
                }
            }
            _ = cancel.cancelled() => break,
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

/// Parse and act on client command frames until the socket closes.
async fn run_reader(
    server: &Arc<Inner>,
    mut stream: SplitStream<WebSocket>,
    tx_new_source: mpsc::Sender<OutboundSource>,
    cancel: CancellationToken,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
    connection_id: Uuid,
) {
    loop {
        let message = tokio::select! {
            maybe = stream.next() => match maybe {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    debug!(connection_id = %connection_id, "websocket read failed: {e}");
                    return;
                }
                None => return,
            },
            _ = cancel.cancelled() => return,
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return,
            // Pings are answered at the protocol layer.
            _ => continue,
        };

        let command: ClientCommand = match serde_json::from_str(&text) {
            Ok(command) => command,
            Err(e) => {
                warn!(connection_id = %connection_id, "unparseable client frame: {e}");
                continue;
            }
        };

        match command {
            ClientCommand::Listen { topic } => {
                let (tx_frame, rx_frame) = mpsc::channel(1);
                server.listen_on(
                    &topic,
                    Listener {
                        connection_id,
                        tx_frame,
                        cancel: cancel.clone(),
                    },
                );
                let source: OutboundSource = Box::pin(ReceiverStream::new(rx_frame));
                if tx_new_source.send(source).await.is_err() {
                    return;
                }
            }
            ClientCommand::ListenReplies => {
                debug!(connection_id = %connection_id, "connection listening for replies");
                let rx_replies = server.replies.subscribe();
                let source: OutboundSource = Box::pin(
                    BroadcastStream::new(rx_replies)
                        // A lagging subscriber skips what it missed.
                        .filter_map(|item| async move { item.ok().map(|v| v.to_string()) }),
                );
                if tx_new_source.send(source).await.is_err() {
                    return;
                }
            }
            ClientCommand::Ack { topic } => {
                server
                    .route_reply(&topic, Ok(()), &cancel, connection_id)
                    .await;
            }
            ClientCommand::Error { topic, message } => {
                server
                    .route_reply(&topic, Err(message), &cancel, connection_id)
                    .await;
            }
        }
    }
}
