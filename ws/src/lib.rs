// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

mod connection;
mod server;

pub use server::{TopicSender, WsServer, DEFAULT_PROCESSING_TIMEOUT};

use std::time::Duration;
use thiserror::Error;

/// Delivery outcomes surfaced to the sender of an in-flight message.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("client rejected the message: {0}")]
    ClientError(String),
    #[error("no acknowledgement within {0:?}")]
    AckTimeout(Duration),
    #[error("websocket server is closed")]
    Closed,
}
