//! Durable ordered key/value store (spec.md §6), realized as a trait plus
//! a RocksDB-backed implementation in the teacher's `StorageManager` idiom,
//! and an in-memory store for fast unit tests.

use crate::error::{XmblError, XmblResult};
use async_trait::async_trait;
use rocksdb::{IteratorMode, Options, DB};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> XmblResult<Option<Vec<u8>>>;
    async fn put(&self, key: &[u8], value: &[u8]) -> XmblResult<()>;
    async fn delete(&self, key: &[u8]) -> XmblResult<()>;
    async fn scan_prefix(&self, prefix: &[u8]) -> XmblResult<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// RocksDB-backed store. Writes are synced before the call returns, per
/// §6's "writes must be durable before returning".
pub struct RocksKvStore {
    db: Arc<DB>,
}

impl RocksKvStore {
    pub fn open(path: impl AsRef<Path>) -> XmblResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(|e| XmblError::IoError(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl KvStore for RocksKvStore {
    async fn get(&self, key: &[u8]) -> XmblResult<Option<Vec<u8>>> {
        self.db.get(key).map_err(|e| XmblError::IoError(e.to_string()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> XmblResult<()> {
        self.db.put(key, value).map_err(|e| XmblError::IoError(e.to_string()))?;
        self.db.flush().map_err(|e| XmblError::IoError(e.to_string()))
    }

    async fn delete(&self, key: &[u8]) -> XmblResult<()> {
        self.db.delete(key).map_err(|e| XmblError::IoError(e.to_string()))
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> XmblResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, rocksdb::Direction::Forward)) {
            let (k, v) = item.map_err(|e| XmblError::IoError(e.to_string()))?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

/// Zero-dependency in-memory store, used by tests that need a `KvStore`
/// without standing up RocksDB.
#[derive(Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &[u8]) -> XmblResult<Option<Vec<u8>>> {
        Ok(self.data.read().expect("kv lock poisoned").get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> XmblResult<()> {
        self.data
            .write()
            .expect("kv lock poisoned")
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> XmblResult<()> {
        self.data.write().expect("kv lock poisoned").remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> XmblResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .data
            .read()
            .expect("kv lock poisoned")
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
