// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::ValidationError;
use serde::{Deserialize, Serialize};

/// Hard cap applied to `batchSize` regardless of what the client asks for.
pub const MAX_BATCH_SIZE: u64 = 1_000;

const DEFAULT_BATCH_SIZE: u64 = 1;
const DEFAULT_BATCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BLOCKED_RETRY_DELAY_SEC: u64 = 30;
const DEFAULT_WEBHOOK_TIMEOUT_SEC: u64 = 30;

/// What a stream does with a batch its sink refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandling {
    /// Retry the same batch forever, sleeping `blockedRetryDelaySec`
    /// between attempts.
    #[default]
    Block,
    /// Log, advance checkpoints as if the batch had been acknowledged,
    /// and move on.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    WebSocket,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketSink {
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSink {
    pub url: String,
    #[serde(default = "default_webhook_timeout")]
    pub request_timeout_sec: u64,
}

fn default_webhook_timeout() -> u64 {
    DEFAULT_WEBHOOK_TIMEOUT_SEC
}

/// The persisted definition of an event stream: the delivery sink shared by
/// one or more subscriptions plus its batching and retry knobs.
///
/// `type` and the sink address are immutable after creation; the batching
/// knobs may be changed later through [`StreamUpdate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StreamKind,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(rename = "batchTimeoutMS", default = "default_batch_timeout")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_retry_delay")]
    pub blocked_retry_delay_sec: u64,
    #[serde(default)]
    pub error_handling: ErrorHandling,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WebSocketSink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookSink>,
    /// Include block timestamps on delivered events.
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub created: String,
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}
fn default_batch_timeout() -> u64 {
    DEFAULT_BATCH_TIMEOUT_MS
}
fn default_retry_delay() -> u64 {
    DEFAULT_BLOCKED_RETRY_DELAY_SEC
}

impl StreamDefinition {
    /// Check the sink section matches the declared type and clamp the
    /// batching knobs into their legal ranges.
    pub fn validate(&mut self) -> Result<(), ValidationError> {
        match self.kind {
            StreamKind::WebSocket => {
                let topic = self.websocket.as_ref().map(|w| w.topic.as_str());
                if topic.unwrap_or("").is_empty() {
                    return Err(ValidationError::MissingField("websocket.topic"));
                }
                if self.webhook.is_some() {
                    return Err(ValidationError::InvalidField {
                        field: "webhook",
                        reason: "not allowed on a websocket stream".into(),
                    });
                }
            }
            StreamKind::Webhook => {
                let url = self.webhook.as_ref().map(|w| w.url.as_str()).unwrap_or("");
                if url.is_empty() {
                    return Err(ValidationError::MissingField("webhook.url"));
                }
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ValidationError::InvalidField {
                        field: "webhook.url",
                        reason: format!("{url:?} is not an http(s) URL"),
                    });
                }
                if self.websocket.is_some() {
                    return Err(ValidationError::InvalidField {
                        field: "websocket",
                        reason: "not allowed on a webhook stream".into(),
                    });
                }
            }
        }
        self.batch_size = self.batch_size.clamp(1, MAX_BATCH_SIZE);
        if self.batch_timeout_ms == 0 {
            self.batch_timeout_ms = DEFAULT_BATCH_TIMEOUT_MS;
        }
        if self.blocked_retry_delay_sec == 0 {
            self.blocked_retry_delay_sec = DEFAULT_BLOCKED_RETRY_DELAY_SEC;
        }
        Ok(())
    }

    /// The websocket topic, for streams that have one.
    pub fn topic(&self) -> Option<&str> {
        self.websocket.as_ref().map(|w| w.topic.as_str())
    }
}

/// The mutable subset of a stream definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    pub name: Option<String>,
    pub batch_size: Option<u64>,
    #[serde(rename = "batchTimeoutMS")]
    pub batch_timeout_ms: Option<u64>,
    pub blocked_retry_delay_sec: Option<u64>,
    pub error_handling: Option<ErrorHandling>,
}

impl StreamUpdate {
    pub fn apply(&self, definition: &mut StreamDefinition) {
        if let Some(name) = &self.name {
            definition.name = name.clone();
        }
        if let Some(size) = self.batch_size {
            definition.batch_size = size.clamp(1, MAX_BATCH_SIZE);
        }
        if let Some(ms) = self.batch_timeout_ms {
            definition.batch_timeout_ms = ms;
        }
        if let Some(sec) = self.blocked_retry_delay_sec {
            definition.blocked_retry_delay_sec = sec;
        }
        if let Some(handling) = self.error_handling {
            definition.error_handling = handling;
        }
    }
}
