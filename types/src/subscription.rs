// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{BlockType, ValidationError};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Where a subscription starts reading the chain when it has no checkpoint.
///
/// Serialized as the strings `"newest"`, `"oldest"`, or a decimal block
/// number. Once a checkpoint exists it always wins over this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FromBlock {
    #[default]
    Newest,
    Oldest,
    Number(u64),
}

impl Serialize for FromBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FromBlock::Newest => serializer.serialize_str("newest"),
            FromBlock::Oldest => serializer.serialize_str("oldest"),
            FromBlock::Number(n) => serializer.serialize_str(&n.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for FromBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "newest" => Ok(FromBlock::Newest),
            "oldest" => Ok(FromBlock::Oldest),
            other => other.parse::<u64>().map(FromBlock::Number).map_err(|_| {
                de::Error::custom(format!(
                    "fromBlock must be \"newest\", \"oldest\" or a block number, got {other:?}"
                ))
            }),
        }
    }
}

impl fmt::Display for FromBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FromBlock::Newest => write!(f, "newest"),
            FromBlock::Oldest => write!(f, "oldest"),
            FromBlock::Number(n) => write!(f, "{n}"),
        }
    }
}

/// How the raw payload bytes of an event are rendered before delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PayloadType {
    #[default]
    #[serde(rename = "bytes")]
    Bytes,
    #[serde(rename = "string")]
    String,
    // "stringifiedJSON" is the deprecated spelling kept for old records.
    #[serde(rename = "json", alias = "stringifiedJSON")]
    Json,
}

/// The persisted part of a subscription's filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedFilter {
    /// Only notify on blocks of this type; `None` accepts every block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,
    /// Only notify on events emitted by this chaincode. Ignored for
    /// config-type subscriptions, which have no chaincode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaincode_id: Option<String>,
    /// Regular expression applied to the event name, anchored on both ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_filter: Option<String>,
}

/// The persisted record of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "channel")]
    pub channel_id: String,
    #[serde(default)]
    pub name: String,
    /// The event stream this subscription delivers through.
    #[serde(rename = "stream")]
    pub stream_id: String,
    #[serde(default)]
    pub signer: String,
    #[serde(default)]
    pub from_block: FromBlock,
    #[serde(default)]
    pub filter: PersistedFilter,
    #[serde(default)]
    pub payload_type: PayloadType,
    #[serde(default)]
    pub created: String,
}

impl SubscriptionInfo {
    /// The adapter key shared by all subscriptions reading the same ledger
    /// block feed. `fromBlock` is deliberately not part of the key: on
    /// restart every cursor resumes from its checkpoint, which would
    /// otherwise split identical feeds.
    pub fn event_client_key(&self) -> String {
        format!(
            "{}-{}",
            self.channel_id,
            self.filter.chaincode_id.as_deref().unwrap_or("")
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.channel_id.is_empty() {
            return Err(ValidationError::MissingField("channel"));
        }
        if self.stream_id.is_empty() {
            return Err(ValidationError::MissingField("stream"));
        }
        if self.filter.block_type != Some(BlockType::Config)
            && self.filter.chaincode_id.as_deref().unwrap_or("").is_empty()
            && self.filter.event_filter.is_none()
        {
            return Err(ValidationError::InvalidField {
                field: "filter",
                reason: "requires a chaincodeId or an eventFilter for tx subscriptions".into(),
            });
        }
        Ok(())
    }
}
