// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

mod checkpoints;
mod mem;
mod receipts;
pub mod rocks;
pub mod traits;

pub use checkpoints::CheckpointStore;
pub use mem::MemMap;
pub use receipts::{ReceiptStore, MAX_RECEIPT_LISTING};
pub use rocks::DBMap;
pub use traits::Map;

use serde::{Deserialize, Serialize};
use std::{path::Path, sync::Arc};
use thiserror::Error;
use types::{Receipt, StreamDefinition, SubscriptionInfo};

#[cfg(test)]
#[path = "tests/store_tests.rs"]
pub mod store_tests;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    RocksDB(#[from] rocksdb::Error),
    #[error("value (de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("column family {0} was not opened with the database")]
    MissingColumnFamily(&'static str),
    #[error("no record for key {0}")]
    NotFound(String),
}

/// Which backing the receipt store uses; subscriptions, streams and
/// checkpoints are always persistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStoreKind {
    Memory,
    #[default]
    Persistent,
}

/// All the data stores of the gateway.
pub struct GatewayStorage {
    pub subscriptions: DBMap<SubscriptionInfo>,
    pub streams: DBMap<StreamDefinition>,
    pub checkpoints: CheckpointStore,
    pub receipts: ReceiptStore,
}

impl GatewayStorage {
    /// The datastore column family names.
    const SUBSCRIPTIONS_CF: &'static str = "subscriptions";
    const STREAMS_CF: &'static str = "streams";
    const CHECKPOINTS_CF: &'static str = "checkpoints";
    const RECEIPTS_CF: &'static str = "receipts";

    /// Open or reopen all the storage of the gateway.
    pub fn open<P: AsRef<Path>>(
        store_path: P,
        receipt_kind: ReceiptStoreKind,
    ) -> Result<Self, StoreError> {
        let rocksdb = rocks::open_cf(
            store_path,
            &[
                Self::SUBSCRIPTIONS_CF,
                Self::STREAMS_CF,
                Self::CHECKPOINTS_CF,
                Self::RECEIPTS_CF,
            ],
        )?;

        let subscriptions = DBMap::reopen(&rocksdb, Self::SUBSCRIPTIONS_CF)?;
        let streams = DBMap::reopen(&rocksdb, Self::STREAMS_CF)?;
        let checkpoints = CheckpointStore::new(Arc::new(DBMap::<u64>::reopen(
            &rocksdb,
            Self::CHECKPOINTS_CF,
        )?));
        let receipt_map: Arc<dyn Map<Receipt>> = match receipt_kind {
            ReceiptStoreKind::Persistent => {
                Arc::new(DBMap::<Receipt>::reopen(&rocksdb, Self::RECEIPTS_CF)?)
            }
            ReceiptStoreKind::Memory => Arc::new(MemMap::<Receipt>::new()),
        };

        Ok(GatewayStorage {
            subscriptions,
            streams,
            checkpoints,
            receipts: ReceiptStore::new(receipt_map),
        })
    }
}
