// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

mod adapter;
mod manager;
pub mod metrics;
mod sink;
mod stream;
mod subscription;

pub use adapter::{AdapterCommand, BlockStreamAdapter};
pub use manager::{StreamStatus, SubscriptionManager};
pub use sink::{SinkError, StreamSink};
pub use stream::{EventStream, StreamCommand, StreamHandle, StreamState};
pub use subscription::Subscription;

use ledger::ChaincodeEvent;
use thiserror::Error;
use types::BlockType;

#[derive(Debug, Error)]
pub enum EventsError {
    #[error("invalid event filter: {0}")]
    BadFilter(#[from] regex::Error),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Ledger(#[from] ledger::LedgerError),
    #[error(transparent)]
    Validation(#[from] types::ValidationError),
    #[error("stream {0} not found")]
    StreamNotFound(String),
    #[error("subscription {0} not found")]
    SubscriptionNotFound(String),
    #[error("stream {0} still has subscriptions attached")]
    StreamBusy(String),
    #[error("stream {0} must be suspended first")]
    StreamNotSuspended(String),
    #[error("webhook client error: {0}")]
    Webhook(#[from] reqwest::Error),
}

/// A decoded chaincode event on its way from a block stream adapter to the
/// event stream owning the target subscription.
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub sub_id: String,
    pub block_number: u64,
    pub block_kind: BlockType,
    pub event: ChaincodeEvent,
}

/// What flows over an adapter-to-stream channel.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(RoutedEvent),
    /// Everything in blocks up to and including `block` has been forwarded
    /// for `sub_id`; lets checkpoints pass blocks with no matching events.
    BlockComplete { sub_id: String, block: u64 },
    /// The ledger-side subscription reported a failure.
    LedgerError { message: String },
}
