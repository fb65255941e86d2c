// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

mod client;
mod sessions;

pub use client::{
    BlockFeed, ChaincodeEvent, DecodedBlock, InvokeRequest, LedgerClient, LedgerUpdate, TxResult,
};
pub use sessions::{SessionCache, SignerUpdateListener};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger rpc failed: {0}")]
    Rpc(String),
    #[error("unknown signer {0}")]
    UnknownSigner(String),
    #[error("block subscription dropped: {0}")]
    SubscriptionDropped(String),
    #[error("ledger request timed out after {0:?}")]
    Timeout(std::time::Duration),
}
