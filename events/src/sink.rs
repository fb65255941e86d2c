// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::EventsError;
use std::time::Duration;
use thiserror::Error;
use types::EventRecord;
use ws::{TopicSender, WsError};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    WebSocket(#[from] WsError),
    #[error("webhook returned status {0}")]
    Status(u16),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Where a stream delivers its batches. Both variants share the same
/// contract: send the batch, then await an acknowledgement (a client
/// `ack` frame for websocket, a 2xx response for webhook) or an error.
pub enum StreamSink {
    WebSocket(TopicSender),
    Webhook { client: reqwest::Client, url: String },
}

impl StreamSink {
    pub fn websocket(sender: TopicSender) -> Self {
        StreamSink::WebSocket(sender)
    }

    pub fn webhook(url: &str, request_timeout: Duration) -> Result<Self, EventsError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(StreamSink::Webhook {
            client,
            url: url.to_string(),
        })
    }

    /// Deliver one batch and wait for its acknowledgement.
    pub async fn deliver(&self, batch: &[EventRecord]) -> Result<(), SinkError> {
        match self {
            StreamSink::WebSocket(sender) => {
                let body = serde_json::to_value(batch).expect("event records serialize");
                sender.deliver(body).await?;
                Ok(())
            }
            StreamSink::Webhook { client, url } => {
                let response = client.post(url).json(batch).send().await?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(SinkError::Status(response.status().as_u16()))
                }
            }
        }
    }

    /// Label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamSink::WebSocket(_) => "websocket",
            StreamSink::Webhook { .. } => "webhook",
        }
    }
}
