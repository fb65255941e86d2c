// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{traits::Map, StoreError};
use std::sync::Arc;
use tracing::debug;

/// Per-subscription cursor storage. The stored number is the next block
/// whose events are still to be delivered: a checkpoint of N means every
/// event in blocks below N has been acknowledged downstream.
///
/// Writes go through [`CheckpointStore::advance`], which never moves a
/// cursor backwards; the only way down is an explicit
/// [`CheckpointStore::reset`].
#[derive(Clone)]
pub struct CheckpointStore {
    map: Arc<dyn Map<u64>>,
}

impl CheckpointStore {
    pub fn new(map: Arc<dyn Map<u64>>) -> Self {
        CheckpointStore { map }
    }

    pub fn get(&self, sub_id: &str) -> Result<Option<u64>, StoreError> {
        self.map.get(sub_id)
    }

    /// Move the cursor forward to `next_block`. A value at or below the
    /// stored cursor is ignored, which makes replayed acknowledgements
    /// harmless.
    pub fn advance(&self, sub_id: &str, next_block: u64) -> Result<u64, StoreError> {
        let current = self.map.get(sub_id)?.unwrap_or(0);
        if next_block <= current {
            return Ok(current);
        }
        self.map.insert(sub_id, &next_block)?;
        debug!(sub_id, from = current, to = next_block, "checkpoint advanced");
        Ok(next_block)
    }

    /// Rewrite the cursor unconditionally. Only reachable through the
    /// subscription reset operation, which requires a suspended stream.
    pub fn reset(&self, sub_id: &str, next_block: u64) -> Result<(), StoreError> {
        self.map.insert(sub_id, &next_block)
    }

    pub fn delete(&self, sub_id: &str) -> Result<(), StoreError> {
        self.map.remove(sub_id)?;
        Ok(())
    }
}
