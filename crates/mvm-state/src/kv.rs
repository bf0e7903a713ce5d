//! Generic ordered key-value backing with prefix iteration.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use mvm_core::ContextError;

/// The store the persistent context layers over. Writes arrive as
/// atomic batches; `None` values are deletions.
pub trait KeyValueStore: Send {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContextError>;

    /// All live pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContextError>;

    /// Apply a batch atomically.
    fn apply(&self, batch: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> Result<(), ContextError>;
}

fn backing(err: impl std::fmt::Display) -> ContextError {
    ContextError::Backing(err.to_string())
}

/// sled-backed store.
pub struct SledKv {
    db: sled::Db,
}

impl SledKv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ContextError> {
        let db = sled::open(path).map_err(backing)?;
        Ok(Self { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }
}

impl KeyValueStore for SledKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContextError> {
        Ok(self.db.get(key).map_err(backing)?.map(|v| v.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContextError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix) {
            let (key, value) = item.map_err(backing)?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    fn apply(&self, batch: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> Result<(), ContextError> {
        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch {
            match value {
                Some(value) => sled_batch.insert(key, value),
                None => sled_batch.remove(key),
            }
        }
        self.db.apply_batch(sled_batch).map_err(backing)?;
        self.db.flush().map_err(backing)?;
        Ok(())
    }
}

/// Map-backed store for tests of the persistent layering.
#[derive(Default)]
pub struct MemKv {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContextError> {
        Ok(self.map.lock().map_err(backing)?.get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContextError> {
        let map = self.map.lock().map_err(backing)?;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: Vec<(Vec<u8>, Option<Vec<u8>>)>) -> Result<(), ContextError> {
        let mut map = self.map.lock().map_err(backing)?;
        for (key, value) in batch {
            match value {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}
