// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{traits::Map, StoreError};
use std::sync::Arc;
use types::{Receipt, ReceiptStatus};

/// Maximum number of receipts returned by a listing.
pub const MAX_RECEIPT_LISTING: usize = 1_000;

/// Storage for async transaction receipts, keyed by request ID. Backed by
/// either the persistent `receipts` column family or an in-memory map,
/// selected in the gateway configuration.
#[derive(Clone)]
pub struct ReceiptStore {
    map: Arc<dyn Map<Receipt>>,
}

impl ReceiptStore {
    pub fn new(map: Arc<dyn Map<Receipt>>) -> Self {
        ReceiptStore { map }
    }

    pub fn get(&self, request_id: &str) -> Result<Option<Receipt>, StoreError> {
        self.map.get(request_id)
    }

    /// Write the initial `pending` receipt for a freshly accepted request.
    pub fn put_pending(&self, receipt: &Receipt) -> Result<(), StoreError> {
        debug_assert_eq!(receipt.status, ReceiptStatus::Pending);
        self.map.insert(&receipt.id, receipt)
    }

    /// Move a receipt to its terminal state and return the stored record.
    /// Terminal transitions are one-way: a receipt that already completed
    /// is returned unchanged.
    pub fn complete(
        &self,
        request_id: &str,
        status: ReceiptStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
    ) -> Result<Receipt, StoreError> {
        debug_assert!(status.is_terminal());
        let Some(mut receipt) = self.map.get(request_id)? else {
            return Err(StoreError::NotFound(request_id.to_string()));
        };
        if receipt.status.is_terminal() {
            return Ok(receipt);
        }
        receipt.status = status;
        receipt.headers.reply_type = status.header_type().to_string();
        receipt.result = result;
        receipt.error_message = error_message;
        receipt.completed_at = Some(types::now_rfc3339());
        self.map.insert(request_id, &receipt)?;
        Ok(receipt)
    }

    /// Receipts in reverse order of arrival, capped at
    /// [`MAX_RECEIPT_LISTING`] or the caller's smaller limit.
    pub fn list(&self, limit: usize) -> Result<Vec<Receipt>, StoreError> {
        let mut receipts: Vec<Receipt> = self.map.iter().map(|(_, r)| r).collect();
        receipts.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        receipts.truncate(limit.min(MAX_RECEIPT_LISTING));
        Ok(receipts)
    }
}
