// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{traits::Map, StoreError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory [`Map`], used for the `memory` receipt store kind and in
/// unit tests. Ordered like its rocksdb twin.
#[derive(Default)]
pub struct MemMap<V> {
    inner: RwLock<BTreeMap<String, V>>,
}

impl<V: Clone> MemMap<V> {
    pub fn new() -> Self {
        MemMap {
            inner: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<V> Map<V> for MemMap<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn insert(&self, key: &str, value: &V) -> Result<(), StoreError> {
        self.inner.write().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().remove(key).is_some())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (String, V)> + '_> {
        let snapshot: Vec<(String, V)> = self
            .inner
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Box::new(snapshot.into_iter())
    }
}
