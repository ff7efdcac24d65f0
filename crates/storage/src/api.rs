use std::fmt::Debug;

use crate::error::StoreError;

/// Ordered key-value engine over a single flat binary keyspace.
///
/// Writes go through [`StorageWriteBatch`]; a batch commits all of its
/// operations or none of them. Readers opened while a batch is in flight see
/// the state from before the commit.
pub trait StorageBackend: Send + Sync + Debug {
    fn begin_read(&self) -> Result<Box<dyn StorageReadView + '_>, StoreError>;

    fn begin_write(&self) -> Result<Box<dyn StorageWriteBatch>, StoreError>;
}

pub trait StorageReadView {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

pub trait StorageWriteBatch: Send {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    fn commit(&mut self) -> Result<(), StoreError>;
}
