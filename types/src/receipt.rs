// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of an asynchronously submitted transaction.
///
/// `Pending` is written before the ledger call is made; the terminal states
/// are written exactly once and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "succeeded")]
    Success,
    #[serde(rename = "failed")]
    Failed,
}

impl ReceiptStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReceiptStatus::Pending)
    }

    /// The reply `type` header used on the wire.
    pub fn header_type(&self) -> &'static str {
        match self {
            ReceiptStatus::Pending => "TransactionPending",
            ReceiptStatus::Success => "TransactionSuccess",
            ReceiptStatus::Failed => "TransactionFailure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptHeaders {
    pub request_id: String,
    #[serde(rename = "type")]
    pub reply_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
}

/// The retrievable record of an async transaction submission, keyed by its
/// request ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(rename = "_id")]
    pub id: String,
    pub headers: ReceiptHeaders,
    pub status: ReceiptStatus,
    /// The transaction result on success, absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// The failure message, absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub received_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl Receipt {
    pub fn pending(request_id: String, channel: String, signer: String) -> Self {
        Receipt {
            id: request_id.clone(),
            headers: ReceiptHeaders {
                request_id,
                reply_type: ReceiptStatus::Pending.header_type().to_string(),
                channel: Some(channel),
                signer: Some(signer),
            },
            status: ReceiptStatus::Pending,
            result: None,
            error_message: None,
            received_at: crate::now_rfc3339(),
            completed_at: None,
        }
    }
}

/// An in-flight chain-mutating request, as accepted on `POST /transactions`.
///
/// `requestId` is client-supplied or generated at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    #[serde(default)]
    pub request_id: String,
    pub signer: String,
    pub channel_id: String,
    pub chaincode_id: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub transient_map: HashMap<String, String>,
    #[serde(default)]
    pub is_init: bool,
}
