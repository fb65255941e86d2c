// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::EventsError;
use base64::Engine;
use ledger::ChaincodeEvent;
use regex::Regex;
use types::{BlockType, PayloadType, SubscriptionInfo};

/// The runtime projection of a persisted subscription: decides which
/// decoded events are candidates for delivery and how their payload bytes
/// are rendered.
pub struct Subscription {
    info: SubscriptionInfo,
    /// The compiled `eventFilter`, anchored on both ends so `Asset.*`
    /// cannot accidentally match `MyAssetThing` in the middle.
    filter: Option<Regex>,
}

impl Subscription {
    pub fn new(info: SubscriptionInfo) -> Result<Self, EventsError> {
        let filter = match info.filter.event_filter.as_deref() {
            Some(pattern) if !pattern.is_empty() => {
                Some(Regex::new(&format!("^(?:{pattern})$"))?)
            }
            _ => None,
        };
        Ok(Subscription { info, filter })
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &SubscriptionInfo {
        &self.info
    }

    /// Whether an event from a block of the given kind is a candidate for
    /// this subscription.
    ///
    /// Config blocks are special: a config-type subscription takes every
    /// config block regardless of `chaincodeId` or `eventFilter` (a pure
    /// config block has no chaincode to match against).
    pub fn matches(&self, block_kind: BlockType, event: &ChaincodeEvent) -> bool {
        if block_kind == BlockType::Config {
            return self.info.filter.block_type == Some(BlockType::Config);
        }
        if self.info.filter.block_type == Some(BlockType::Config) {
            return false;
        }
        if let Some(chaincode_id) = self.info.filter.chaincode_id.as_deref() {
            if !chaincode_id.is_empty() && chaincode_id != event.chaincode_id {
                return false;
            }
        }
        match &self.filter {
            Some(regex) => regex.is_match(&event.event_name),
            None => true,
        }
    }

    /// Render raw payload bytes per the subscription's `payloadType`.
    ///
    /// `json` payloads that fail to parse degrade to the `bytes` rendering
    /// with an error carried back for the stream to handle per its
    /// `errorHandling`.
    pub fn render(&self, payload: &[u8]) -> Result<serde_json::Value, serde_json::Value> {
        match self.info.payload_type {
            PayloadType::Bytes => Ok(base64_value(payload)),
            PayloadType::String => Ok(serde_json::Value::String(
                String::from_utf8_lossy(payload).into_owned(),
            )),
            PayloadType::Json => {
                serde_json::from_slice(payload).map_err(|_| base64_value(payload))
            }
        }
    }
}

fn base64_value(payload: &[u8]) -> serde_json::Value {
    serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(payload))
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
pub mod subscription_tests;
