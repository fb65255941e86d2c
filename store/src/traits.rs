// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::StoreError;

/// Interface to a typed, ordered map of string keys to JSON-serializable
/// values. Implemented by the rocksdb column-family view [`crate::DBMap`]
/// and the in-memory [`crate::MemMap`].
///
/// Individual writes are durable on return; iteration observes every
/// preceding write. Nothing here offers multi-key atomicity; callers
/// maintain their invariants by write ordering.
pub trait Map<V>: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<V>, StoreError>;

    fn insert(&self, key: &str, value: &V) -> Result<(), StoreError>;

    /// Remove a key, reporting whether it was present.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// All entries in ascending key order.
    fn iter(&self) -> Box<dyn Iterator<Item = (String, V)> + '_>;
}
