pub mod consensus;
pub mod error;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use basalt_common::types::{
    validate_block, validate_block_header, Block, BlockBody, BlockHash, BlockHeader, BlockNumber,
    ChainConfig, Genesis,
};
use basalt_common::U256;
use basalt_storage::{Store, StoreBatch, StoreError};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

pub use consensus::PowVerifier;
pub use error::ChainError;

#[derive(Debug, Clone)]
pub struct BlockchainOptions {
    /// Run structural and seal validation on incoming blocks.
    pub validate: bool,
    /// Seal verifier consulted when validation is on. `None` skips seal
    /// checks, for chains whose seals are verified upstream.
    pub pow: Option<Arc<dyn PowVerifier>>,
}

impl Default for BlockchainOptions {
    fn default() -> Self {
        Self {
            validate: true,
            pow: None,
        }
    }
}

/// Block lookup key for the read side of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdentifier {
    Hash(BlockHash),
    Number(BlockNumber),
}

impl From<BlockHash> for BlockIdentifier {
    fn from(hash: BlockHash) -> Self {
        BlockIdentifier::Hash(hash)
    }
}

impl From<BlockNumber> for BlockIdentifier {
    fn from(number: BlockNumber) -> Self {
        BlockIdentifier::Number(number)
    }
}

/// An incoming item: a full block, or a bare header for which no body key
/// is written and the full-block head is left alone.
enum ChainItem {
    Block(Block),
    Header(BlockHeader),
}

/// Process-wide chain pointers. Mutated only while the mutation lock is
/// held; the copy here always matches the last committed batch.
#[derive(Debug, Clone, Default)]
struct ChainHeads {
    head_header: BlockHash,
    head_block: BlockHash,
    genesis: BlockHash,
    iterator_heads: HashMap<String, BlockHash>,
}

/// A persistent blockchain: headers, bodies and accumulated difficulties in
/// an ordered key-value store, with the canonical chain selected by highest
/// total difficulty.
///
/// Mutations are serialized through a fair async lock, so at most one
/// put/delete pipeline is in flight and batches commit in admission order.
/// Reads never take that lock; a read that races a mutation sees the state
/// from before the in-flight commit.
#[derive(Debug)]
pub struct Blockchain {
    storage: Store,
    config: ChainConfig,
    validate: bool,
    pow: Option<Arc<dyn PowVerifier>>,
    heads: RwLock<ChainHeads>,
    mutation_lock: TokioMutex<()>,
}

impl Blockchain {
    /// Open the chain over `storage`. On an empty store the configured
    /// genesis block is persisted; on an existing store it must match the
    /// stored one. Construction failure leaves no usable instance.
    pub async fn new(
        storage: Store,
        genesis: Genesis,
        options: BlockchainOptions,
    ) -> Result<Self, ChainError> {
        let genesis_block = genesis.block();
        let genesis_hash = genesis_block.hash();
        let chain = Self {
            storage,
            config: genesis.config,
            validate: options.validate,
            pow: options.pow,
            heads: RwLock::new(ChainHeads::default()),
            mutation_lock: TokioMutex::new(()),
        };

        match chain.storage.get_canonical_block_hash(0)? {
            Some(stored) => {
                if stored != genesis_hash {
                    return Err(ChainError::GenesisMismatch);
                }
                let iterator_heads = chain.storage.get_iterator_heads()?;
                let head_header = chain
                    .storage
                    .get_head_header_hash()?
                    .unwrap_or(genesis_hash);
                let head_block = chain.storage.get_head_block_hash()?.unwrap_or(genesis_hash);
                debug!("Resuming chain at head header {head_header:#x}");
                chain.write_heads(ChainHeads {
                    head_header,
                    head_block,
                    genesis: genesis_hash,
                    iterator_heads,
                })?;
            }
            None => {
                info!("Initializing chain with genesis block {genesis_hash:#x}");
                chain
                    .put_block_or_header(ChainItem::Block(genesis_block), true)
                    .await?;
            }
        }
        Ok(chain)
    }

    pub fn chain_config(&self) -> ChainConfig {
        self.config
    }

    pub fn genesis_hash(&self) -> Result<BlockHash, ChainError> {
        Ok(self.read_heads()?.genesis)
    }

    /// Store a full block, reorganizing the canonical chain if its total
    /// difficulty beats the current head.
    pub async fn add_block(&self, block: Block) -> Result<(), ChainError> {
        self.put_block_or_header(ChainItem::Block(block), false).await
    }

    pub async fn add_blocks(&self, blocks: Vec<Block>) -> Result<(), ChainError> {
        for block in blocks {
            self.add_block(block).await?;
        }
        Ok(())
    }

    /// Store a bare header. The header competes for the canonical chain but
    /// never advances the full-block head.
    pub async fn add_header(&self, header: BlockHeader) -> Result<(), ChainError> {
        self.put_block_or_header(ChainItem::Header(header), false)
            .await
    }

    pub async fn add_headers(&self, headers: Vec<BlockHeader>) -> Result<(), ChainError> {
        for header in headers {
            self.add_header(header).await?;
        }
        Ok(())
    }

    pub fn get_block(&self, id: BlockIdentifier) -> Result<Option<Block>, ChainError> {
        match id {
            BlockIdentifier::Hash(hash) => Ok(self.storage.get_block_by_hash(hash)?),
            BlockIdentifier::Number(number) => Ok(self.storage.get_block_by_number(number)?),
        }
    }

    /// Walk blocks by height starting at `from`, yielding every
    /// `skip + 1`-th visited block, at most `max_blocks` of them. A missing
    /// block ends the walk with whatever was gathered.
    pub fn get_blocks(
        &self,
        from: BlockIdentifier,
        max_blocks: usize,
        skip: usize,
        reverse: bool,
    ) -> Result<Vec<Block>, ChainError> {
        let mut blocks = Vec::new();
        if max_blocks == 0 {
            return Ok(blocks);
        }
        let mut visited: u64 = 0;
        let mut next = Some(from);
        while let Some(id) = next {
            let Some(block) = self.get_block(id)? else {
                break;
            };
            let number = block.header.number;
            let include = visited == 0 || skip == 0 || visited % (skip as u64 + 1) == 0;
            visited += 1;
            if include {
                blocks.push(block);
                if blocks.len() >= max_blocks {
                    break;
                }
            }
            next = if reverse {
                number.checked_sub(1).map(BlockIdentifier::Number)
            } else {
                Some(BlockIdentifier::Number(number + 1))
            };
        }
        Ok(blocks)
    }

    /// Given hashes ordered oldest-first along some chain, binary-search
    /// for the boundary between known and unknown and return the unknown
    /// suffix.
    pub fn select_needed_hashes(
        &self,
        hashes: &[BlockHash],
    ) -> Result<Vec<BlockHash>, ChainError> {
        let mut min: i64 = 0;
        let mut max: i64 = hashes.len() as i64 - 1;
        let mut mid: i64 = 0;
        while max >= min {
            let known = self
                .storage
                .get_block_number(hashes[mid as usize])?
                .is_some();
            if known {
                min = mid + 1;
            } else {
                max = mid - 1;
            }
            mid = (min + max) / 2;
        }
        Ok(hashes[min as usize..].to_vec())
    }

    pub fn get_total_difficulty(&self, block_hash: BlockHash) -> Result<Option<U256>, ChainError> {
        Ok(self.storage.get_total_difficulty(block_hash, None)?)
    }

    /// Header of the highest-difficulty chain tip.
    pub fn latest_header(&self) -> Result<BlockHeader, ChainError> {
        let head = self.read_heads()?.head_header;
        self.storage
            .get_block_header(head, None)?
            .ok_or_else(|| missing_head(head).into())
    }

    /// Highest-difficulty block whose body chain is fully present.
    pub fn latest_block(&self) -> Result<Block, ChainError> {
        let head = self.read_heads()?.head_block;
        self.storage
            .get_block_by_hash(head)?
            .ok_or_else(|| missing_head(head).into())
    }

    /// Block a named iterator last consumed, falling back to the full-block
    /// head for unknown names.
    pub fn get_iterator_head(&self, name: &str) -> Result<Option<Block>, ChainError> {
        let heads = self.read_heads()?;
        let hash = heads
            .iterator_heads
            .get(name)
            .copied()
            .unwrap_or(heads.head_block);
        Ok(self.storage.get_block_by_hash(hash)?)
    }

    /// Delete a block. A canonical target takes its canonical descendants
    /// with it and repoints heads at its parent; a side-chain target is
    /// removed alone, since siblings may still anchor other chains.
    pub async fn remove_block(&self, block_hash: BlockHash) -> Result<(), ChainError> {
        let _permit = self.mutation_lock.lock().await;
        let mut heads = self.read_heads()?;

        let header = self
            .storage
            .get_block_header(block_hash, None)?
            .ok_or(ChainError::BlockNotFound(block_hash))?;
        let number = header.number;
        let canonical = self.storage.get_canonical_block_hash(number)? == Some(block_hash);
        // anchor for head fix-ups; only a canonical delete cascades
        let new_head = canonical.then_some(header.parent_hash);

        let mut batch = StoreBatch::default();
        let mut current = (block_hash, number);
        let mut removed: u64 = 0;
        loop {
            let (hash, height) = current;
            batch.delete_block_header(height, hash);
            batch.delete_block_body(height, hash);
            batch.delete_block_number(hash);
            batch.delete_total_difficulty(height, hash);
            removed += 1;

            let Some(new_head) = new_head else {
                break;
            };
            if heads.head_header == hash {
                heads.head_header = new_head;
            }
            if heads.head_block == hash {
                heads.head_block = new_head;
            }
            match self.storage.get_canonical_block_hash(height + 1)? {
                Some(child) => current = (child, height + 1),
                None => break,
            }
        }
        if canonical {
            self.delete_stale_assignments(number, header.parent_hash, &mut heads, &mut batch)?;
        }

        batch.set_iterator_heads(&heads.iterator_heads)?;
        batch.set_head_header_hash(heads.head_header);
        batch.set_head_block_hash(heads.head_block);

        self.commit(batch).await?;
        self.write_heads(heads)?;
        debug!("Removed {removed} block(s) starting at {block_hash:#x}");
        Ok(())
    }

    /// Advance the named cursor along the canonical chain, invoking
    /// `on_block` for every block above it. The `reorg` flag tells the
    /// consumer that the block does not extend the one it saw last, which
    /// happens right after a reorganization replaced the cursor's branch.
    /// Progress is persisted in a single batch when iteration stops; a
    /// callback error aborts the run and surfaces unchanged.
    pub async fn iterate<F, Fut>(
        &self,
        name: &str,
        max_blocks: Option<u64>,
        mut on_block: F,
    ) -> Result<u64, ChainError>
    where
        F: FnMut(Block, bool) -> Fut,
        Fut: Future<Output = Result<(), ChainError>>,
    {
        let start_hash = {
            let heads = self.read_heads()?;
            heads
                .iterator_heads
                .get(name)
                .copied()
                .unwrap_or(heads.genesis)
        };
        let start_number = self
            .storage
            .get_block_number(start_hash)?
            .ok_or(ChainError::BlockNotFound(start_hash))?;
        // the cursor's own block anchors reorg detection across runs
        let mut last_block = self.storage.get_block_by_hash(start_hash)?;
        let mut number = start_number + 1;
        let mut consumed = 0u64;
        let mut new_head = None;
        let mut callback_error = None;

        while max_blocks.map_or(true, |max| consumed < max) {
            let Some(block) = self.storage.get_block_by_number(number)? else {
                break;
            };
            let reorg = last_block
                .as_ref()
                .map_or(false, |last| last.hash() != block.header.parent_hash);
            let hash = block.hash();
            if let Err(error) = on_block(block.clone(), reorg).await {
                callback_error = Some(error);
                break;
            }
            new_head = Some(hash);
            last_block = Some(block);
            number += 1;
            consumed += 1;
        }

        if let Some(head) = new_head {
            let _permit = self.mutation_lock.lock().await;
            let mut heads = self.read_heads()?;
            heads.iterator_heads.insert(name.to_string(), head);
            let mut batch = StoreBatch::default();
            batch.set_iterator_heads(&heads.iterator_heads)?;
            batch.set_head_header_hash(heads.head_header);
            batch.set_head_block_hash(heads.head_block);
            self.commit(batch).await?;
            self.write_heads(heads)?;
        }

        match callback_error {
            Some(error) => Err(error),
            None => Ok(consumed),
        }
    }

    async fn put_block_or_header(
        &self,
        item: ChainItem,
        is_genesis: bool,
    ) -> Result<(), ChainError> {
        let _permit = self.mutation_lock.lock().await;

        let (block, has_body) = match item {
            ChainItem::Block(block) => (block, true),
            ChainItem::Header(header) => (Block::new(header, BlockBody::default()), false),
        };
        let hash = block.hash();
        let number = block.header.number;

        // the store only accepts data for the chain it was opened for
        for tx in &block.body.transactions {
            if let Some(found) = tx.chain_id() {
                if found != self.config.chain_id {
                    return Err(ChainError::ChainIdMismatch {
                        expected: self.config.chain_id,
                        found,
                    });
                }
            }
        }

        if self.validate && !is_genesis {
            if number == 0 {
                return Err(ChainError::GenesisAlreadyStored);
            }
            let parent = self
                .storage
                .get_block_header(block.header.parent_hash, number.checked_sub(1))?
                .ok_or(ChainError::ParentNotFound(hash))?;
            if has_body {
                validate_block(&block, &parent, &self.config)?;
            } else {
                validate_block_header(&block.header, &parent, &self.config)?;
            }
            if let Some(pow) = &self.pow {
                if !pow.verify_seal(&block.header) {
                    return Err(ChainError::InvalidSeal(hash));
                }
            }
        }

        let mut heads = self.read_heads()?;

        let (current_header_td, current_block_td) = if is_genesis {
            (U256::zero(), U256::zero())
        } else {
            let header_td = self
                .storage
                .get_total_difficulty(heads.head_header, None)?
                .ok_or_else(|| missing_head(heads.head_header))?;
            let block_td = self
                .storage
                .get_total_difficulty(heads.head_block, None)?
                .ok_or_else(|| missing_head(heads.head_block))?;
            (header_td, block_td)
        };

        let block_td = if is_genesis {
            block.header.difficulty
        } else {
            let parent_td = self
                .storage
                .get_total_difficulty(block.header.parent_hash, number.checked_sub(1))?
                .ok_or(ChainError::ParentNotFound(hash))?;
            parent_td + block.header.difficulty
        };

        let mut batch = StoreBatch::default();
        batch.put_total_difficulty(number, hash, block_td);
        batch.put_block_header(hash, &block.header);
        if has_body && (is_genesis || !block.body.is_empty()) {
            batch.put_block_body(number, hash, &block.body);
        }

        // ties lose: the first hash seen at a given difficulty stays head
        let wins_header = is_genesis || block_td > current_header_td;
        if wins_header {
            heads.head_header = hash;
            if has_body {
                heads.head_block = hash;
            }
            if is_genesis {
                heads.genesis = hash;
            }
            self.delete_stale_assignments(number + 1, hash, &mut heads, &mut batch)?;
            self.rebuild_canonical(&block.header, &mut heads, &mut batch)?;
            debug!("Block {hash:#x} is the new canonical head at height {number}");
        } else {
            if has_body && block_td > current_block_td {
                heads.head_block = hash;
            }
            // keep side-chain blocks locatable by hash
            batch.put_block_number(hash, number);
            debug!("Stored side-chain block {hash:#x} at height {number}");
        }

        batch.set_iterator_heads(&heads.iterator_heads)?;
        batch.set_head_header_hash(heads.head_header);
        batch.set_head_block_hash(heads.head_block);

        self.commit(batch).await?;
        self.write_heads(heads)?;
        Ok(())
    }

    /// Clear canonical assignments above the new head, walking up from
    /// `from` until the first unassigned height. Iterator heads and the
    /// full-block head sitting on a cleared height follow the new head.
    fn delete_stale_assignments(
        &self,
        from: BlockNumber,
        head_hash: BlockHash,
        heads: &mut ChainHeads,
        batch: &mut StoreBatch,
    ) -> Result<(), ChainError> {
        let mut number = from;
        while let Some(stale) = self.storage.get_canonical_block_hash(number)? {
            batch.delete_canonical_block_hash(number);
            for cursor in heads.iterator_heads.values_mut() {
                if *cursor == stale {
                    *cursor = head_hash;
                }
            }
            if heads.head_block == stale {
                heads.head_block = head_hash;
            }
            number += 1;
        }
        Ok(())
    }

    /// Rewire the canonical index to the chain ending in `header`, walking
    /// parents backward until an ancestor that is already canonical. A
    /// full-block head displaced by the walk is reset to that ancestor, the
    /// deepest block surviving on the canonical chain. Iterator heads are
    /// left alone: their consumers discover the switch through the `reorg`
    /// flag on the next run.
    fn rebuild_canonical(
        &self,
        header: &BlockHeader,
        heads: &mut ChainHeads,
        batch: &mut StoreBatch,
    ) -> Result<(), ChainError> {
        let top_number = header.number;
        let mut current = header.clone();
        let mut head_block_stale = false;
        let mut reassigned: u64 = 0;
        loop {
            let hash = current.hash();
            let number = current.number;
            let stale = self.storage.get_canonical_block_hash(number)?;
            if stale == Some(hash) {
                // older ancestors are already canonical
                if head_block_stale {
                    heads.head_block = hash;
                }
                break;
            }
            batch.set_canonical_block_hash(number, hash);
            batch.put_block_number(hash, number);
            if let Some(stale_hash) = stale {
                reassigned += 1;
                if heads.head_block == stale_hash {
                    head_block_stale = true;
                }
            }
            if number == 0 {
                if head_block_stale {
                    heads.head_block = hash;
                }
                break;
            }
            current = self
                .storage
                .get_block_header(current.parent_hash, Some(number - 1))?
                .ok_or(ChainError::MissingCanonicalParent(number - 1))?;
        }
        if reassigned > 0 {
            info!("Reorganized canonical chain: {reassigned} height(s) reassigned below block {top_number}");
        }
        Ok(())
    }

    async fn commit(&self, batch: StoreBatch) -> Result<(), ChainError> {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.write_batch(batch))
            .await
            .map_err(|e| StoreError::Custom(format!("Task panicked: {e}")))??;
        Ok(())
    }

    fn read_heads(&self) -> Result<ChainHeads, ChainError> {
        Ok(self
            .heads
            .read()
            .map_err(|_| StoreError::LockError)?
            .clone())
    }

    fn write_heads(&self, heads: ChainHeads) -> Result<(), ChainError> {
        *self.heads.write().map_err(|_| StoreError::LockError)? = heads;
        Ok(())
    }
}

fn missing_head(hash: BlockHash) -> StoreError {
    StoreError::Custom(format!("Missing data for chain head {hash:#x}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_common::constants::EMPTY_OMMERS_HASH;
    use basalt_common::types::{InvalidBlockError, Transaction};
    use basalt_common::{H64, H256};
    use basalt_storage::EngineType;

    fn test_store() -> Store {
        Store::new("blockchain-test-db", EngineType::InMemory).expect("create test store")
    }

    async fn new_chain() -> (Blockchain, Store) {
        let store = test_store();
        let chain = Blockchain::new(store.clone(), Genesis::dev(), BlockchainOptions::default())
            .await
            .expect("initialize chain");
        (chain, store)
    }

    fn child_block(parent: &BlockHeader, difficulty: u64) -> Block {
        child_block_with_body(parent, difficulty, BlockBody::default())
    }

    fn child_block_with_body(parent: &BlockHeader, difficulty: u64, body: BlockBody) -> Block {
        let header = BlockHeader {
            parent_hash: parent.hash(),
            ommers_hash: EMPTY_OMMERS_HASH,
            difficulty: U256::from(difficulty),
            number: parent.number + 1,
            gas_limit: parent.gas_limit,
            timestamp: parent.timestamp + 12,
            ..Default::default()
        };
        Block::new(header, body)
    }

    fn chain_of(parent: &BlockHeader, difficulties: &[u64]) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(difficulties.len());
        let mut parent = parent.clone();
        for difficulty in difficulties {
            let block = child_block(&parent, *difficulty);
            parent = block.header.clone();
            blocks.push(block);
        }
        blocks
    }

    #[tokio::test]
    async fn fresh_store_starts_at_genesis() {
        let (chain, store) = new_chain().await;
        let genesis = Genesis::dev().header();

        assert_eq!(chain.latest_header().unwrap(), genesis);
        assert_eq!(chain.latest_block().unwrap().header, genesis);
        assert_eq!(chain.genesis_hash().unwrap(), genesis.hash());
        assert_eq!(
            store.get_canonical_block_hash(0).unwrap(),
            Some(genesis.hash())
        );
        assert_eq!(
            chain.get_total_difficulty(genesis.hash()).unwrap(),
            Some(genesis.difficulty)
        );
    }

    #[tokio::test]
    async fn linear_growth_advances_both_heads() {
        let (chain, store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let blocks = chain_of(&genesis, &[100, 100, 100, 100, 100]);
        chain.add_blocks(blocks.clone()).await.unwrap();

        let tip = blocks.last().unwrap();
        assert_eq!(chain.latest_header().unwrap(), tip.header);
        assert_eq!(chain.latest_block().unwrap(), *tip);
        assert_eq!(
            chain.get_total_difficulty(tip.hash()).unwrap(),
            Some(genesis.difficulty + U256::from(500u64))
        );
        for block in &blocks {
            assert_eq!(
                store.get_canonical_block_hash(block.header.number).unwrap(),
                Some(block.hash())
            );
            assert_eq!(
                store.get_block_number(block.hash()).unwrap(),
                Some(block.header.number)
            );
        }
    }

    #[tokio::test]
    async fn heavier_branch_reorganizes_the_canonical_chain() {
        let (chain, store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let a = chain_of(&genesis, &[100, 100, 100, 100, 100]);
        chain.add_blocks(a.clone()).await.unwrap();

        // fork off block 2 with a heavier tail
        let b = chain_of(&a[1].header, &[150, 150, 150, 150]);
        chain.add_blocks(b.clone()).await.unwrap();

        assert_eq!(chain.latest_header().unwrap(), b[3].header);
        assert_eq!(
            store.get_canonical_block_hash(3).unwrap(),
            Some(b[0].hash())
        );
        assert_eq!(
            store.get_canonical_block_hash(6).unwrap(),
            Some(b[3].hash())
        );
        // the displaced blocks stay retrievable by hash, off the canonical chain
        for stale in &a[2..] {
            let found = chain
                .get_block(BlockIdentifier::Hash(stale.hash()))
                .unwrap()
                .unwrap();
            assert_eq!(found, *stale);
            assert_ne!(
                store.get_canonical_block_hash(stale.header.number).unwrap(),
                Some(stale.hash())
            );
        }
    }

    #[tokio::test]
    async fn iterator_reports_reorg_on_its_next_run() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let a = chain_of(&genesis, &[100, 100, 100, 100, 100]);
        chain.add_blocks(a.clone()).await.unwrap();

        let mut seen = Vec::new();
        let consumed = chain
            .iterate("vm", None, |block, reorg| {
                seen.push((block.header.number, reorg));
                std::future::ready(Ok(()))
            })
            .await
            .unwrap();
        assert_eq!(consumed, 5);
        assert!(seen.iter().all(|(_, reorg)| !reorg));
        assert_eq!(
            chain.get_iterator_head("vm").unwrap().unwrap().hash(),
            a[4].hash()
        );

        let b = chain_of(&a[1].header, &[150, 150, 150, 150]);
        chain.add_blocks(b.clone()).await.unwrap();

        let mut first = None;
        chain
            .iterate("vm", Some(1), |block, reorg| {
                first = Some((block.header.number, reorg));
                std::future::ready(Ok(()))
            })
            .await
            .unwrap();
        assert_eq!(first, Some((6, true)));
        assert_eq!(
            chain.get_iterator_head("vm").unwrap().unwrap().hash(),
            b[3].hash()
        );
    }

    #[tokio::test]
    async fn iterator_surfaces_callback_errors_without_advancing() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        chain
            .add_blocks(chain_of(&genesis, &[100, 100, 100]))
            .await
            .unwrap();

        let result = chain
            .iterate("vm", None, |_, _| {
                std::future::ready(Err(ChainError::Custom("consumer failed".to_string())))
            })
            .await;
        assert!(matches!(result, Err(ChainError::Custom(_))));

        // nothing was consumed, so the cursor restarts from genesis
        let consumed = chain
            .iterate("vm", None, |_, _| std::future::ready(Ok(())))
            .await
            .unwrap();
        assert_eq!(consumed, 3);
    }

    #[tokio::test]
    async fn deleting_a_canonical_block_cascades_to_descendants() {
        let (chain, store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let a = chain_of(&genesis, &[100, 100, 100, 100, 100]);
        chain.add_blocks(a.clone()).await.unwrap();
        chain
            .iterate("vm", None, |_, _| std::future::ready(Ok(())))
            .await
            .unwrap();

        chain.remove_block(a[2].hash()).await.unwrap();

        for gone in &a[2..] {
            let hash = gone.hash();
            assert_eq!(chain.get_block(BlockIdentifier::Hash(hash)).unwrap(), None);
            assert_eq!(store.get_block_number(hash).unwrap(), None);
            assert_eq!(store.get_total_difficulty(hash, Some(gone.header.number)).unwrap(), None);
            assert_eq!(
                store.get_canonical_block_hash(gone.header.number).unwrap(),
                None
            );
        }
        assert_eq!(chain.latest_header().unwrap(), a[1].header);
        assert_eq!(chain.latest_block().unwrap(), a[1]);
        // the iterator cursor followed the surviving chain
        assert_eq!(
            chain.get_iterator_head("vm").unwrap().unwrap().hash(),
            a[1].hash()
        );
    }

    #[tokio::test]
    async fn deleting_a_side_chain_block_leaves_the_canonical_chain_alone() {
        let (chain, store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let a = chain_of(&genesis, &[100, 100]);
        chain.add_blocks(a.clone()).await.unwrap();
        let sibling = child_block(&genesis, 50);
        chain.add_block(sibling.clone()).await.unwrap();

        chain.remove_block(sibling.hash()).await.unwrap();

        assert_eq!(
            chain.get_block(BlockIdentifier::Hash(sibling.hash())).unwrap(),
            None
        );
        assert_eq!(chain.latest_header().unwrap(), a[1].header);
        assert_eq!(
            store.get_canonical_block_hash(1).unwrap(),
            Some(a[0].hash())
        );
    }

    #[derive(Debug)]
    struct RequireSealedNonce;

    impl PowVerifier for RequireSealedNonce {
        fn verify_seal(&self, header: &BlockHeader) -> bool {
            !header.nonce.is_zero()
        }
    }

    #[tokio::test]
    async fn unsealed_block_is_rejected_without_side_effects() {
        let store = test_store();
        let options = BlockchainOptions {
            validate: true,
            pow: Some(Arc::new(RequireSealedNonce)),
        };
        let chain = Blockchain::new(store.clone(), Genesis::dev(), options)
            .await
            .unwrap();
        let genesis = chain.latest_header().unwrap();

        let unsealed = child_block(&genesis, 100);
        let hash = unsealed.hash();
        let result = chain.add_block(unsealed).await;
        assert!(matches!(result, Err(ChainError::InvalidSeal(h)) if h == hash));
        assert_eq!(store.get_block_header(hash, Some(1)).unwrap(), None);
        assert_eq!(store.get_block_number(hash).unwrap(), None);
        assert_eq!(store.get_total_difficulty(hash, Some(1)).unwrap(), None);

        let mut sealed = child_block(&genesis, 100);
        sealed.header.nonce = H64::from_low_u64_be(0x2a);
        chain.add_block(sealed.clone()).await.unwrap();
        assert_eq!(chain.latest_header().unwrap(), sealed.header);
    }

    #[tokio::test]
    async fn structural_validation_rejects_a_stale_timestamp() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();

        let mut block = child_block(&genesis, 100);
        block.header.timestamp = genesis.timestamp;
        let result = chain.add_block(block).await;
        assert!(matches!(
            result,
            Err(ChainError::InvalidBlock(InvalidBlockError::StaleTimestamp { .. }))
        ));
    }

    #[tokio::test]
    async fn foreign_chain_id_is_rejected_before_validation() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();

        let body = BlockBody {
            transactions: vec![Transaction {
                v: U256::from(35 + 2 * 999u64),
                ..Default::default()
            }],
            ommers: vec![],
        };
        let result = chain.add_block(child_block_with_body(&genesis, 100, body)).await;
        assert!(matches!(
            result,
            Err(ChainError::ChainIdMismatch {
                expected: 1337,
                found: 999
            })
        ));
    }

    #[tokio::test]
    async fn block_without_a_stored_parent_is_rejected() {
        let (chain, _store) = new_chain().await;
        let orphan_parent = BlockHeader {
            number: 10,
            timestamp: 120,
            gas_limit: 8_000_000,
            ..Default::default()
        };
        let orphan = child_block(&orphan_parent, 100);
        assert!(matches!(
            chain.add_block(orphan).await,
            Err(ChainError::ParentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn a_second_genesis_block_is_rejected() {
        let (chain, _store) = new_chain().await;
        let result = chain.add_block(Genesis::dev().block()).await;
        assert!(matches!(result, Err(ChainError::GenesisAlreadyStored)));
    }

    #[tokio::test]
    async fn putting_the_same_block_twice_changes_nothing() {
        let (chain, store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let blocks = chain_of(&genesis, &[100, 100]);
        chain.add_blocks(blocks.clone()).await.unwrap();

        let head = chain.latest_header().unwrap();
        let td = chain.get_total_difficulty(head.hash()).unwrap();

        chain.add_block(blocks[1].clone()).await.unwrap();

        assert_eq!(chain.latest_header().unwrap(), head);
        assert_eq!(chain.get_total_difficulty(head.hash()).unwrap(), td);
        assert_eq!(
            store.get_canonical_block_hash(2).unwrap(),
            Some(blocks[1].hash())
        );
    }

    #[tokio::test]
    async fn equal_difficulty_keeps_the_first_seen_head() {
        let (chain, store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();

        let first = child_block(&genesis, 100);
        let mut second = child_block(&genesis, 100);
        second.header.extra_data = vec![0x01];
        assert_ne!(first.hash(), second.hash());

        chain.add_block(first.clone()).await.unwrap();
        chain.add_block(second.clone()).await.unwrap();

        assert_eq!(chain.latest_header().unwrap(), first.header);
        assert_eq!(
            store.get_canonical_block_hash(1).unwrap(),
            Some(first.hash())
        );
        // the losing sibling is still locatable by hash
        assert_eq!(store.get_block_number(second.hash()).unwrap(), Some(1));
    }

    #[tokio::test]
    async fn header_chain_accepts_bodies_catching_up() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let blocks = chain_of(&genesis, &[100, 100, 100]);

        let headers: Vec<BlockHeader> = blocks.iter().map(|b| b.header.clone()).collect();
        chain.add_headers(headers).await.unwrap();

        assert_eq!(chain.latest_header().unwrap(), blocks[2].header);
        // no bodies yet, so the full-block head is still genesis
        assert_eq!(chain.latest_block().unwrap().header, genesis);

        chain.add_blocks(blocks.clone()).await.unwrap();
        assert_eq!(chain.latest_block().unwrap(), blocks[2]);
        assert_eq!(chain.latest_header().unwrap(), blocks[2].header);
    }

    #[tokio::test]
    async fn select_needed_hashes_returns_the_unknown_suffix() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let known = chain_of(&genesis, &[100, 100, 100]);
        chain.add_blocks(known.clone()).await.unwrap();
        let unknown = chain_of(&known[2].header, &[100, 100]);

        let mut hashes: Vec<BlockHash> = known.iter().map(Block::hash).collect();
        hashes.extend(unknown.iter().map(Block::hash));

        let needed = chain.select_needed_hashes(&hashes).unwrap();
        assert_eq!(
            needed,
            unknown.iter().map(Block::hash).collect::<Vec<_>>()
        );

        let all_known: Vec<BlockHash> = known.iter().map(Block::hash).collect();
        assert!(chain.select_needed_hashes(&all_known).unwrap().is_empty());

        let all_unknown: Vec<BlockHash> = unknown.iter().map(Block::hash).collect();
        assert_eq!(chain.select_needed_hashes(&all_unknown).unwrap(), all_unknown);

        assert!(chain.select_needed_hashes(&[]).unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_blocks_walks_forward_reverse_and_with_skips() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let blocks = chain_of(&genesis, &[100, 100, 100, 100, 100]);
        chain.add_blocks(blocks.clone()).await.unwrap();

        let numbers = |found: Vec<Block>| -> Vec<u64> {
            found.into_iter().map(|b| b.header.number).collect()
        };

        let forward = chain
            .get_blocks(BlockIdentifier::Number(0), 3, 0, false)
            .unwrap();
        assert_eq!(numbers(forward), vec![0, 1, 2]);

        let reverse = chain
            .get_blocks(BlockIdentifier::Hash(blocks[4].hash()), 3, 0, true)
            .unwrap();
        assert_eq!(numbers(reverse), vec![5, 4, 3]);

        let sparse = chain
            .get_blocks(BlockIdentifier::Number(0), 3, 1, false)
            .unwrap();
        assert_eq!(numbers(sparse), vec![0, 2, 4]);

        // a missing block terminates the walk with what was gathered
        let tail = chain
            .get_blocks(BlockIdentifier::Number(4), 10, 0, false)
            .unwrap();
        assert_eq!(numbers(tail), vec![4, 5]);

        let nowhere = chain
            .get_blocks(BlockIdentifier::Hash(H256::repeat_byte(0xff)), 3, 0, false)
            .unwrap();
        assert!(nowhere.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_commit_in_some_serial_order() {
        let (chain, store) = new_chain().await;
        let chain = Arc::new(chain);
        let genesis = chain.latest_header().unwrap();

        let siblings: Vec<Block> = (0..8u64)
            .map(|i| child_block(&genesis, 100 + i))
            .collect();
        let mut handles = Vec::new();
        for block in siblings.clone() {
            let chain = chain.clone();
            handles.push(tokio::spawn(async move { chain.add_block(block).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // the heaviest sibling wins regardless of arrival order
        let winner = siblings.last().unwrap();
        assert_eq!(chain.latest_header().unwrap(), winner.header);
        assert_eq!(
            store.get_canonical_block_hash(1).unwrap(),
            Some(winner.hash())
        );
        for block in &siblings {
            assert!(chain
                .get_block(BlockIdentifier::Hash(block.hash()))
                .unwrap()
                .is_some());
        }
    }

    #[tokio::test]
    async fn reopening_the_store_restores_heads_and_cursors() {
        let (chain, store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let blocks = chain_of(&genesis, &[100, 100, 100]);
        chain.add_blocks(blocks.clone()).await.unwrap();
        chain
            .iterate("vm", Some(2), |_, _| std::future::ready(Ok(())))
            .await
            .unwrap();
        drop(chain);

        let reopened = Blockchain::new(store, Genesis::dev(), BlockchainOptions::default())
            .await
            .unwrap();
        assert_eq!(reopened.latest_header().unwrap(), blocks[2].header);
        assert_eq!(reopened.latest_block().unwrap(), blocks[2]);
        assert_eq!(
            reopened.get_iterator_head("vm").unwrap().unwrap().hash(),
            blocks[1].hash()
        );
    }

    #[tokio::test]
    async fn reopening_with_a_different_genesis_fails() {
        let (chain, store) = new_chain().await;
        drop(chain);
        let result =
            Blockchain::new(store, Genesis::mainnet(), BlockchainOptions::default()).await;
        assert!(matches!(result, Err(ChainError::GenesisMismatch)));
    }

    #[tokio::test]
    async fn unknown_iterator_name_falls_back_to_the_head_block() {
        let (chain, _store) = new_chain().await;
        let genesis = chain.latest_header().unwrap();
        let blocks = chain_of(&genesis, &[100, 100]);
        chain.add_blocks(blocks.clone()).await.unwrap();

        let head = chain.get_iterator_head("miner").unwrap().unwrap();
        assert_eq!(head, chain.latest_block().unwrap());
    }
}
