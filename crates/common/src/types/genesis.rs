use ethereum_types::{Address, H64, H256, U256};
use hex_literal::hex;
use serde::{Deserialize, Serialize};

use super::block::{Block, BlockBody, BlockHeader, BlockNumber};
use crate::constants::{EMPTY_OMMERS_HASH, EMPTY_TRIE_ROOT, INITIAL_BASE_FEE};

/// Chain parameters the store needs: the network identity and the fork knob
/// that changes the header schema. Execution-level fork scheduling lives with
/// the consumer, not here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub london_block: Option<BlockNumber>,
}

impl ChainConfig {
    pub fn is_london(&self, block_number: BlockNumber) -> bool {
        self.london_block
            .map_or(false, |activation| block_number >= activation)
    }
}

/// Externally-specified genesis parameters. The store never derives genesis
/// state itself; it only persists the block these parameters describe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Genesis {
    pub config: ChainConfig,
    pub difficulty: U256,
    pub extra_data: Vec<u8>,
    pub gas_limit: u64,
    pub timestamp: u64,
    pub nonce: H64,
    pub mix_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
}

impl Genesis {
    /// Ethereum mainnet genesis parameters.
    pub fn mainnet() -> Self {
        Genesis {
            config: ChainConfig {
                chain_id: 1,
                london_block: Some(12_965_000),
            },
            difficulty: U256::from(17_179_869_184u64),
            extra_data: hex!("11bbe8db4e347b4e8c937c1c8370e4b5ed33adb3db69cbdb7a38e1e50b1b82fa")
                .to_vec(),
            gas_limit: 5_000,
            timestamp: 0,
            nonce: H64::from_low_u64_be(0x42),
            mix_hash: H256::zero(),
            coinbase: Address::zero(),
            state_root: H256(hex!(
                "d7f8974fb5ac78d9ac099b9ad5018bedc2ce0a72dad1827a1709da30580f0544"
            )),
        }
    }

    /// Local development chain with a trivially low difficulty.
    pub fn dev() -> Self {
        Genesis {
            config: ChainConfig {
                chain_id: 1337,
                london_block: None,
            },
            difficulty: U256::from(0x20000u64),
            extra_data: Vec::new(),
            gas_limit: 8_000_000,
            timestamp: 0,
            nonce: H64::from_low_u64_be(0x42),
            mix_hash: H256::zero(),
            coinbase: Address::zero(),
            state_root: EMPTY_TRIE_ROOT,
        }
    }

    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            parent_hash: H256::zero(),
            ommers_hash: EMPTY_OMMERS_HASH,
            coinbase: self.coinbase,
            state_root: self.state_root,
            transactions_root: EMPTY_TRIE_ROOT,
            receipts_root: EMPTY_TRIE_ROOT,
            logs_bloom: Default::default(),
            difficulty: self.difficulty,
            number: 0,
            gas_limit: self.gas_limit,
            gas_used: 0,
            timestamp: self.timestamp,
            extra_data: self.extra_data.clone(),
            mix_hash: self.mix_hash,
            nonce: self.nonce,
            base_fee_per_gas: self.config.is_london(0).then_some(INITIAL_BASE_FEE),
        }
    }

    pub fn block(&self) -> Block {
        Block::new(self.header(), BlockBody::default())
    }
}
