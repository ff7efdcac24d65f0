use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use rustc_hash::FxBuildHasher;

use crate::error::StoreError;

/// Key families persisted by the store. Each cached family gets its own
/// bounded LRU shard; `ChainMeta` (head pointers and the heads index) is
/// read rarely enough that it is served straight from the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFamily {
    Header,
    Body,
    TotalDifficulty,
    NumberToHash,
    HashToNumber,
    ChainMeta,
}

const HEADER_CACHE_SIZE: usize = 512;
const BODY_CACHE_SIZE: usize = 256;
const TOTAL_DIFFICULTY_CACHE_SIZE: usize = 1024;
const NUMBER_TO_HASH_CACHE_SIZE: usize = 2048;
const HASH_TO_NUMBER_CACHE_SIZE: usize = 2048;

type Shard = Arc<Mutex<LruCache<Vec<u8>, Vec<u8>, FxBuildHasher>>>;

fn shard(capacity: usize) -> Shard {
    let capacity = NonZeroUsize::new(capacity).expect("cache capacity is non-zero");
    Arc::new(Mutex::new(LruCache::with_hasher(capacity, FxBuildHasher)))
}

/// Write-through cache over the encoded key-value pairs of the hot families.
///
/// Entries are inserted on read misses and after a batch commit succeeds;
/// staging alongside the batch (rather than during its construction) keeps a
/// failed commit from leaving the cache ahead of the store.
#[derive(Clone, Debug)]
pub struct WriteCache {
    headers: Shard,
    bodies: Shard,
    total_difficulties: Shard,
    number_to_hash: Shard,
    hash_to_number: Shard,
}

impl Default for WriteCache {
    fn default() -> Self {
        Self {
            headers: shard(HEADER_CACHE_SIZE),
            bodies: shard(BODY_CACHE_SIZE),
            total_difficulties: shard(TOTAL_DIFFICULTY_CACHE_SIZE),
            number_to_hash: shard(NUMBER_TO_HASH_CACHE_SIZE),
            hash_to_number: shard(HASH_TO_NUMBER_CACHE_SIZE),
        }
    }
}

impl WriteCache {
    fn shard_for(&self, family: KeyFamily) -> Option<&Shard> {
        match family {
            KeyFamily::Header => Some(&self.headers),
            KeyFamily::Body => Some(&self.bodies),
            KeyFamily::TotalDifficulty => Some(&self.total_difficulties),
            KeyFamily::NumberToHash => Some(&self.number_to_hash),
            KeyFamily::HashToNumber => Some(&self.hash_to_number),
            KeyFamily::ChainMeta => None,
        }
    }

    pub fn get(&self, family: KeyFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(shard) = self.shard_for(family) else {
            return Ok(None);
        };
        let mut shard = shard.lock().map_err(|_| StoreError::LockError)?;
        Ok(shard.get(key).cloned())
    }

    pub fn insert(&self, family: KeyFamily, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        if let Some(shard) = self.shard_for(family) {
            let mut shard = shard.lock().map_err(|_| StoreError::LockError)?;
            shard.put(key, value);
        }
        Ok(())
    }

    pub fn remove(&self, family: KeyFamily, key: &[u8]) -> Result<(), StoreError> {
        if let Some(shard) = self.shard_for(family) {
            let mut shard = shard.lock().map_err(|_| StoreError::LockError)?;
            shard.pop(key);
        }
        Ok(())
    }
}
