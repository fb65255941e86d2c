// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use crate::{traits::Map, StoreError};
use rocksdb::{BoundColumnFamily, DBWithThreadMode, MultiThreaded, Options};
use serde::{de::DeserializeOwned, Serialize};
use std::{marker::PhantomData, path::Path, sync::Arc};

/// Open a rocksdb database with the given column families, creating any
/// that are missing.
pub fn open_cf<P: AsRef<Path>>(
    path: P,
    cf_names: &[&str],
) -> Result<Arc<DBWithThreadMode<MultiThreaded>>, StoreError> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);

    let db = DBWithThreadMode::<MultiThreaded>::open_cf(&options, path, cf_names)
        .map_err(StoreError::RocksDB)?;
    Ok(Arc::new(db))
}

/// A typed view over one rocksdb column family. Keys are strings; values
/// are JSON encoded, which is the persisted-state compatibility contract:
/// old readers ignore fields added by newer writers.
#[derive(Clone)]
pub struct DBMap<V> {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    cf_name: &'static str,
    _value: PhantomData<V>,
}

impl<V> DBMap<V>
where
    V: Serialize + DeserializeOwned,
{
    pub fn reopen(
        db: &Arc<DBWithThreadMode<MultiThreaded>>,
        cf_name: &'static str,
    ) -> Result<Self, StoreError> {
        // Fail fast if the family was not opened with the database.
        db.cf_handle(cf_name)
            .ok_or(StoreError::MissingColumnFamily(cf_name))?;
        Ok(DBMap {
            db: db.clone(),
            cf_name,
            _value: PhantomData,
        })
    }

    fn cf(&self) -> Arc<BoundColumnFamily<'_>> {
        self.db
            .cf_handle(self.cf_name)
            .expect("column family was validated at open")
    }
}

impl<V> Map<V> for DBMap<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<V>, StoreError> {
        match self.db.get_cf(&self.cf(), key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn insert(&self, key: &str, value: &V) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(&self.cf(), key.as_bytes(), bytes)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let present = self.db.get_cf(&self.cf(), key.as_bytes())?.is_some();
        self.db.delete_cf(&self.cf(), key.as_bytes())?;
        Ok(present)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (String, V)> + '_> {
        let iter = self
            .db
            .iterator_cf(&self.cf(), rocksdb::IteratorMode::Start)
            .filter_map(|entry| {
                let (key, value) = entry.ok()?;
                let key = String::from_utf8(key.to_vec()).ok()?;
                let value = serde_json::from_slice(&value).ok()?;
                Some((key, value))
            });
        Box::new(iter)
    }
}
