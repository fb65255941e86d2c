// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// The kind of ledger block a subscription filter may select.
///
/// `Tx` covers endorser transaction blocks, `Config` covers channel
/// configuration and configuration-update blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Tx,
    Config,
}

/// A single chaincode event, normalised from a decoded ledger block and
/// stamped with the subscription it is routed to.
///
/// The total order of events within one subscription is
/// `(blockNumber, transactionIndex, eventIndex)`; see [`EventKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub chaincode_id: String,
    pub block_number: u64,
    pub transaction_id: String,
    pub transaction_index: u32,
    pub event_index: u32,
    pub event_name: String,
    /// Rendered per the owning subscription's `payloadType`: a base64
    /// string, a UTF-8 string, or a decoded JSON document.
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub sub_id: String,
}

impl EventRecord {
    pub fn key(&self) -> EventKey {
        EventKey {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            event_index: self.event_index,
        }
    }

    /// Sort key for deterministic batch emission when a batch interleaves
    /// several subscriptions.
    pub fn emission_key(&self) -> (String, EventKey) {
        (self.sub_id.clone(), self.key())
    }
}

/// The per-subscription delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub block_number: u64,
    pub transaction_index: u32,
    pub event_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(block: u64, tx: u32, event: u32) -> EventRecord {
        EventRecord {
            chaincode_id: "erc20".into(),
            block_number: block,
            transaction_id: format!("tx-{block}-{tx}"),
            transaction_index: tx,
            event_index: event,
            event_name: "Transfer".into(),
            payload: serde_json::Value::Null,
            timestamp: None,
            sub_id: "sb-1".into(),
        }
    }

    #[test]
    fn event_keys_order_by_block_then_tx_then_index() {
        let keys = vec![
            record(2, 0, 0).key(),
            record(1, 3, 0).key(),
            record(1, 0, 5).key(),
            record(1, 0, 1).key(),
        ];
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(
            sorted,
            vec![
                record(1, 0, 1).key(),
                record(1, 0, 5).key(),
                record(1, 3, 0).key(),
                record(2, 0, 0).key(),
            ]
        );
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let json = serde_json::to_value(record(7, 1, 2)).unwrap();
        assert_eq!(json["blockNumber"], 7);
        assert_eq!(json["transactionIndex"], 1);
        assert_eq!(json["eventIndex"], 2);
        assert_eq!(json["subId"], "sb-1");
        // Absent timestamps are omitted entirely.
        assert!(json.get("timestamp").is_none());
    }
}
