use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::api::{StorageBackend, StorageReadView, StorageWriteBatch};
use crate::error::StoreError;

type KeySpace = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// Ordered in-memory backend, the default engine for tests and ephemeral
/// nodes. Batches buffer their operations and apply them under a single
/// write lock, so a commit is atomic with respect to concurrent readers.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: KeySpace,
}

impl InMemoryBackend {
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::default())
    }
}

impl StorageBackend for InMemoryBackend {
    fn begin_read(&self) -> Result<Box<dyn StorageReadView + '_>, StoreError> {
        Ok(Box::new(InMemoryReadView {
            inner: self.inner.clone(),
        }))
    }

    fn begin_write(&self) -> Result<Box<dyn StorageWriteBatch>, StoreError> {
        Ok(Box::new(InMemoryWriteBatch {
            inner: self.inner.clone(),
            ops: Vec::new(),
        }))
    }
}

struct InMemoryReadView {
    inner: KeySpace,
}

impl StorageReadView for InMemoryReadView {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::LockError)?;
        Ok(map.get(key).cloned())
    }
}

enum PendingOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

struct InMemoryWriteBatch {
    inner: KeySpace,
    ops: Vec<PendingOp>,
}

impl StorageWriteBatch for InMemoryWriteBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.ops.push(PendingOp::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.ops.push(PendingOp::Delete(key.to_vec()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::LockError)?;
        for op in self.ops.drain(..) {
            match op {
                PendingOp::Put(key, value) => {
                    map.insert(key, value);
                }
                PendingOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}
