use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use basalt_common::types::{Block, BlockBody, BlockHash, BlockHeader, BlockNumber};
use basalt_common::{H256, U256};
use tracing::debug;

use crate::api::StorageBackend;
use crate::backend::in_memory::InMemoryBackend;
#[cfg(feature = "rocksdb")]
use crate::backend::rocksdb::RocksDbBackend;
use crate::cache::{KeyFamily, WriteCache};
use crate::error::StoreError;
use crate::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    InMemory,
    #[cfg(feature = "rocksdb")]
    RocksDb,
}

/// Typed access to the chain keyspace: encoded reads for headers, bodies,
/// total difficulties and the two number/hash indexes, plus atomic batch
/// writes. Cheap to clone; clones share the backend and caches.
#[derive(Debug, Clone)]
pub struct Store {
    backend: Arc<dyn StorageBackend>,
    cache: WriteCache,
}

impl Store {
    pub fn new(path: impl AsRef<Path>, engine_type: EngineType) -> Result<Self, StoreError> {
        // Ignore unused variable warning when compiling without DB features
        let _db_path = path.as_ref();
        match engine_type {
            #[cfg(feature = "rocksdb")]
            EngineType::RocksDb => Ok(Self::from_backend(Arc::new(RocksDbBackend::open(
                _db_path,
            )?))),
            EngineType::InMemory => Ok(Self::from_backend(Arc::new(InMemoryBackend::open()?))),
        }
    }

    /// Wrap an externally-owned key-value engine.
    pub fn from_backend(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cache: WriteCache::default(),
        }
    }

    fn read_through(
        &self,
        family: KeyFamily,
        key: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.cache.get(family, &key)? {
            return Ok(Some(value));
        }
        let Some(value) = self.backend.begin_read()?.get(&key)? else {
            return Ok(None);
        };
        self.cache.insert(family, key, value.clone())?;
        Ok(Some(value))
    }

    fn resolve_number(
        &self,
        block_hash: BlockHash,
        block_number: Option<BlockNumber>,
    ) -> Result<Option<BlockNumber>, StoreError> {
        match block_number {
            Some(number) => Ok(Some(number)),
            None => self.get_block_number(block_hash),
        }
    }

    /// Obtain a block header by hash. Passing the number skips the
    /// hash-to-number lookup.
    pub fn get_block_header(
        &self,
        block_hash: BlockHash,
        block_number: Option<BlockNumber>,
    ) -> Result<Option<BlockHeader>, StoreError> {
        let Some(number) = self.resolve_number(block_hash, block_number)? else {
            return Ok(None);
        };
        let key = keys::header_key(number, &block_hash);
        let Some(bytes) = self.read_through(KeyFamily::Header, key)? else {
            return Ok(None);
        };
        Ok(Some(rlp::decode(&bytes)?))
    }

    /// Obtain a block body by hash. Blocks persisted with an empty body have
    /// no body key at all, so `None` covers both "unknown" and "empty".
    pub fn get_block_body(
        &self,
        block_hash: BlockHash,
        block_number: Option<BlockNumber>,
    ) -> Result<Option<BlockBody>, StoreError> {
        let Some(number) = self.resolve_number(block_hash, block_number)? else {
            return Ok(None);
        };
        let key = keys::body_key(number, &block_hash);
        let Some(bytes) = self.read_through(KeyFamily::Body, key)? else {
            return Ok(None);
        };
        Ok(Some(rlp::decode(&bytes)?))
    }

    /// Obtain the accumulated difficulty from genesis up to the given block.
    pub fn get_total_difficulty(
        &self,
        block_hash: BlockHash,
        block_number: Option<BlockNumber>,
    ) -> Result<Option<U256>, StoreError> {
        let Some(number) = self.resolve_number(block_hash, block_number)? else {
            return Ok(None);
        };
        let key = keys::total_difficulty_key(number, &block_hash);
        let Some(bytes) = self.read_through(KeyFamily::TotalDifficulty, key)? else {
            return Ok(None);
        };
        Ok(Some(rlp::decode(&bytes)?))
    }

    /// Obtain the block number for a given hash.
    pub fn get_block_number(
        &self,
        block_hash: BlockHash,
    ) -> Result<Option<BlockNumber>, StoreError> {
        let key = keys::hash_to_number_key(&block_hash);
        let Some(bytes) = self.read_through(KeyFamily::HashToNumber, key)? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Custom("Invalid block number bytes".to_string()))?;
        Ok(Some(BlockNumber::from_be_bytes(raw)))
    }

    /// Obtain the canonical block hash for a given block number.
    pub fn get_canonical_block_hash(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<BlockHash>, StoreError> {
        let key = keys::number_to_hash_key(block_number);
        let Some(bytes) = self.read_through(KeyFamily::NumberToHash, key)? else {
            return Ok(None);
        };
        Ok(Some(decode_hash(&bytes)?))
    }

    /// Obtain any block by hash, composing its header and body. A missing
    /// body key materialises as an empty body.
    pub fn get_block_by_hash(&self, block_hash: BlockHash) -> Result<Option<Block>, StoreError> {
        let Some(header) = self.get_block_header(block_hash, None)? else {
            return Ok(None);
        };
        let body = self
            .get_block_body(block_hash, Some(header.number))?
            .unwrap_or_default();
        Ok(Some(Block::new(header, body)))
    }

    /// Obtain the canonical block at a given height.
    pub fn get_block_by_number(
        &self,
        block_number: BlockNumber,
    ) -> Result<Option<Block>, StoreError> {
        let Some(block_hash) = self.get_canonical_block_hash(block_number)? else {
            return Ok(None);
        };
        self.get_block_by_hash(block_hash)
    }

    /// Obtain the named iterator cursors; an absent index is an empty map.
    pub fn get_iterator_heads(&self) -> Result<HashMap<String, BlockHash>, StoreError> {
        let Some(bytes) = self.backend.begin_read()?.get(keys::ITERATOR_HEADS_KEY)? else {
            return Ok(HashMap::new());
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn get_head_header_hash(&self) -> Result<Option<BlockHash>, StoreError> {
        self.get_meta_hash(keys::HEAD_HEADER_KEY)
    }

    pub fn get_head_block_hash(&self) -> Result<Option<BlockHash>, StoreError> {
        self.get_meta_hash(keys::HEAD_BLOCK_KEY)
    }

    fn get_meta_hash(&self, key: &[u8]) -> Result<Option<BlockHash>, StoreError> {
        let Some(bytes) = self.backend.begin_read()?.get(key)? else {
            return Ok(None);
        };
        Ok(Some(decode_hash(&bytes)?))
    }

    /// Commit a batch atomically, then bring the caches in line with the
    /// newly durable state. Nothing is cached for a batch that fails.
    pub fn write_batch(&self, batch: StoreBatch) -> Result<(), StoreError> {
        let mut txn = self.backend.begin_write()?;
        for op in &batch.ops {
            match op {
                BatchOp::Put { key, value, .. } => txn.put(key, value)?,
                BatchOp::Delete { key, .. } => txn.delete(key)?,
            }
        }
        txn.commit()?;
        debug!("Committed batch of {} operations", batch.ops.len());

        for op in batch.ops {
            match op {
                BatchOp::Put { family, key, value } => self.cache.insert(family, key, value)?,
                BatchOp::Delete { family, key } => self.cache.remove(family, &key)?,
            }
        }
        Ok(())
    }
}

fn decode_hash(bytes: &[u8]) -> Result<H256, StoreError> {
    if bytes.len() != 32 {
        return Err(StoreError::Custom("Invalid block hash bytes".to_string()));
    }
    Ok(H256::from_slice(bytes))
}

enum BatchOp {
    Put {
        family: KeyFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        family: KeyFamily,
        key: Vec<u8>,
    },
}

/// Accumulator for one atomic commit. Chain logic appends typed operations
/// while it walks the chain, then hands the whole batch to
/// [`Store::write_batch`].
#[derive(Default)]
pub struct StoreBatch {
    ops: Vec<BatchOp>,
}

impl StoreBatch {
    fn put(&mut self, family: KeyFamily, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { family, key, value });
    }

    fn delete(&mut self, family: KeyFamily, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { family, key });
    }

    pub fn put_block_header(&mut self, block_hash: BlockHash, header: &BlockHeader) {
        self.put(
            KeyFamily::Header,
            keys::header_key(header.number, &block_hash),
            rlp::encode(header).to_vec(),
        );
    }

    pub fn delete_block_header(&mut self, block_number: BlockNumber, block_hash: BlockHash) {
        self.delete(KeyFamily::Header, keys::header_key(block_number, &block_hash));
    }

    pub fn put_block_body(
        &mut self,
        block_number: BlockNumber,
        block_hash: BlockHash,
        body: &BlockBody,
    ) {
        self.put(
            KeyFamily::Body,
            keys::body_key(block_number, &block_hash),
            rlp::encode(body).to_vec(),
        );
    }

    pub fn delete_block_body(&mut self, block_number: BlockNumber, block_hash: BlockHash) {
        self.delete(KeyFamily::Body, keys::body_key(block_number, &block_hash));
    }

    pub fn put_total_difficulty(
        &mut self,
        block_number: BlockNumber,
        block_hash: BlockHash,
        total_difficulty: U256,
    ) {
        self.put(
            KeyFamily::TotalDifficulty,
            keys::total_difficulty_key(block_number, &block_hash),
            rlp::encode(&total_difficulty).to_vec(),
        );
    }

    pub fn delete_total_difficulty(&mut self, block_number: BlockNumber, block_hash: BlockHash) {
        self.delete(
            KeyFamily::TotalDifficulty,
            keys::total_difficulty_key(block_number, &block_hash),
        );
    }

    pub fn set_canonical_block_hash(&mut self, block_number: BlockNumber, block_hash: BlockHash) {
        self.put(
            KeyFamily::NumberToHash,
            keys::number_to_hash_key(block_number),
            block_hash.as_bytes().to_vec(),
        );
    }

    pub fn delete_canonical_block_hash(&mut self, block_number: BlockNumber) {
        self.delete(KeyFamily::NumberToHash, keys::number_to_hash_key(block_number));
    }

    pub fn put_block_number(&mut self, block_hash: BlockHash, block_number: BlockNumber) {
        self.put(
            KeyFamily::HashToNumber,
            keys::hash_to_number_key(&block_hash),
            block_number.to_be_bytes().to_vec(),
        );
    }

    pub fn delete_block_number(&mut self, block_hash: BlockHash) {
        self.delete(KeyFamily::HashToNumber, keys::hash_to_number_key(&block_hash));
    }

    pub fn set_head_header_hash(&mut self, block_hash: BlockHash) {
        self.put(
            KeyFamily::ChainMeta,
            keys::HEAD_HEADER_KEY.to_vec(),
            block_hash.as_bytes().to_vec(),
        );
    }

    pub fn set_head_block_hash(&mut self, block_hash: BlockHash) {
        self.put(
            KeyFamily::ChainMeta,
            keys::HEAD_BLOCK_KEY.to_vec(),
            block_hash.as_bytes().to_vec(),
        );
    }

    pub fn set_iterator_heads(
        &mut self,
        heads: &HashMap<String, BlockHash>,
    ) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(heads)?;
        self.put(KeyFamily::ChainMeta, keys::ITERATOR_HEADS_KEY.to_vec(), encoded);
        Ok(())
    }
}
