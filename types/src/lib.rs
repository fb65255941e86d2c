// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

mod duration_format;
mod event;
mod receipt;
mod stream;
mod subscription;
mod wsproto;

pub use duration_format::duration_secs;
pub use event::{BlockType, EventKey, EventRecord};
pub use receipt::{Receipt, ReceiptHeaders, ReceiptStatus, TxRequest};
pub use stream::{
    ErrorHandling, StreamDefinition, StreamKind, StreamUpdate, WebSocketSink, WebhookSink,
    MAX_BATCH_SIZE,
};
pub use subscription::{FromBlock, PayloadType, PersistedFilter, SubscriptionInfo};
pub use wsproto::ClientCommand;

use thiserror::Error;

/// Errors raised while validating user supplied configuration records.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Generate a fresh unique identifier for persisted records.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time as an RFC-3339 string, the format used by every persisted
/// `created` / `receivedAt` / `completedAt` field.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
