use ethereum_types::{Address, Bloom, H256, H64, U256};
use keccak_hash::keccak;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use thiserror::Error;

use super::genesis::ChainConfig;
use super::transaction::Transaction;
use crate::constants::MAX_EXTRA_DATA_SIZE;

pub type BlockNumber = u64;
pub type BlockHash = H256;

/// Proof-of-work era block header. The fifteen mandatory fields are encoded
/// in protocol order; `base_fee_per_gas` is appended only for post-London
/// headers so encodings stay byte-exact with existing databases.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub ommers_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: BlockNumber,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: H256,
    pub nonce: H64,
    pub base_fee_per_gas: Option<u64>,
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        keccak(rlp::encode(self))
    }
}

impl Encodable for BlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        let field_count = if self.base_fee_per_gas.is_some() { 16 } else { 15 };
        s.begin_list(field_count);
        s.append(&self.parent_hash);
        s.append(&self.ommers_hash);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.transactions_root);
        s.append(&self.receipts_root);
        s.append(&self.logs_bloom);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.timestamp);
        s.append(&self.extra_data);
        s.append(&self.mix_hash);
        s.append(&self.nonce);
        if let Some(base_fee) = self.base_fee_per_gas {
            s.append(&base_fee);
        }
    }
}

impl Decodable for BlockHeader {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let field_count = rlp.item_count()?;
        if !(15..=16).contains(&field_count) {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(BlockHeader {
            parent_hash: rlp.val_at(0)?,
            ommers_hash: rlp.val_at(1)?,
            coinbase: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            transactions_root: rlp.val_at(4)?,
            receipts_root: rlp.val_at(5)?,
            logs_bloom: rlp.val_at(6)?,
            difficulty: rlp.val_at(7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            timestamp: rlp.val_at(11)?,
            extra_data: rlp.val_at(12)?,
            mix_hash: rlp.val_at(13)?,
            nonce: rlp.val_at(14)?,
            base_fee_per_gas: if field_count == 16 {
                Some(rlp.val_at(15)?)
            } else {
                None
            },
        })
    }
}

/// Transactions and ommers of a block. Persisted as the two-item RLP list
/// `[transactions, ommers]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
    pub ommers: Vec<BlockHeader>,
}

impl BlockBody {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.ommers.is_empty()
    }

    /// Keccak-256 of the RLP ommers list, as committed to by the header.
    pub fn ommers_hash(&self) -> H256 {
        let mut s = RlpStream::new();
        s.append_list(&self.ommers);
        keccak(s.out())
    }
}

impl Encodable for BlockBody {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append_list(&self.transactions);
        s.append_list(&self.ommers);
    }
}

impl Decodable for BlockBody {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(BlockBody {
            transactions: rlp.list_at(0)?,
            ommers: rlp.list_at(1)?,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub body: BlockBody,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self { header, body }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidBlockError {
    #[error("block number {number} does not follow parent number {parent}")]
    NonSequentialNumber { number: u64, parent: u64 },
    #[error("timestamp {timestamp} is not after parent timestamp {parent}")]
    StaleTimestamp { timestamp: u64, parent: u64 },
    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedAboveLimit { used: u64, limit: u64 },
    #[error("extra data is {0} bytes, above the protocol maximum")]
    ExtraDataTooLong(usize),
    #[error("difficulty must be non-zero")]
    ZeroDifficulty,
    #[error("base fee presence does not match the active fork")]
    UnexpectedBaseFee,
    #[error("ommers hash does not match the block body")]
    OmmersHashMismatch,
}

/// Structural header checks against the declared parent. Seal verification
/// is a separate concern and not performed here.
pub fn validate_block_header(
    header: &BlockHeader,
    parent: &BlockHeader,
    config: &ChainConfig,
) -> Result<(), InvalidBlockError> {
    if header.number != parent.number + 1 {
        return Err(InvalidBlockError::NonSequentialNumber {
            number: header.number,
            parent: parent.number,
        });
    }
    if header.timestamp <= parent.timestamp {
        return Err(InvalidBlockError::StaleTimestamp {
            timestamp: header.timestamp,
            parent: parent.timestamp,
        });
    }
    if header.gas_used > header.gas_limit {
        return Err(InvalidBlockError::GasUsedAboveLimit {
            used: header.gas_used,
            limit: header.gas_limit,
        });
    }
    if header.extra_data.len() > MAX_EXTRA_DATA_SIZE {
        return Err(InvalidBlockError::ExtraDataTooLong(header.extra_data.len()));
    }
    if header.difficulty.is_zero() {
        return Err(InvalidBlockError::ZeroDifficulty);
    }
    if header.base_fee_per_gas.is_some() != config.is_london(header.number) {
        return Err(InvalidBlockError::UnexpectedBaseFee);
    }
    Ok(())
}

/// Header checks plus header/body consistency.
pub fn validate_block(
    block: &Block,
    parent: &BlockHeader,
    config: &ChainConfig,
) -> Result<(), InvalidBlockError> {
    validate_block_header(&block.header, parent, config)?;
    if block.header.ommers_hash != block.body.ommers_hash() {
        return Err(InvalidBlockError::OmmersHashMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EMPTY_OMMERS_HASH;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            parent_hash: H256::repeat_byte(0xaa),
            ommers_hash: EMPTY_OMMERS_HASH,
            coinbase: Address::repeat_byte(0x11),
            state_root: H256::repeat_byte(0xbb),
            transactions_root: H256::repeat_byte(0xcc),
            receipts_root: H256::repeat_byte(0xdd),
            logs_bloom: Bloom::default(),
            difficulty: U256::from(131_072u64),
            number: 7,
            gas_limit: 8_000_000,
            gas_used: 21_000,
            timestamp: 1_438_269_988,
            extra_data: b"basalt".to_vec(),
            mix_hash: H256::repeat_byte(0xee),
            nonce: H64::from_low_u64_be(0x42),
            base_fee_per_gas: None,
        }
    }

    #[test]
    fn empty_ommers_list_hashes_to_known_constant() {
        assert_eq!(BlockBody::default().ommers_hash(), EMPTY_OMMERS_HASH);
    }

    #[test]
    fn header_encoding_survives_optional_base_fee() {
        let legacy = sample_header();
        let decoded: BlockHeader = rlp::decode(&rlp::encode(&legacy)).unwrap();
        assert_eq!(decoded, legacy);

        let mut london = sample_header();
        london.base_fee_per_gas = Some(875_000_000);
        let decoded: BlockHeader = rlp::decode(&rlp::encode(&london)).unwrap();
        assert_eq!(decoded, london);
        assert_ne!(london.hash(), legacy.hash());
    }

    #[test]
    fn body_with_ommers_commits_to_them() {
        let body = BlockBody {
            transactions: vec![],
            ommers: vec![sample_header()],
        };
        let decoded: BlockBody = rlp::decode(&rlp::encode(&body)).unwrap();
        assert_eq!(decoded, body);
        assert_ne!(body.ommers_hash(), EMPTY_OMMERS_HASH);
    }

    #[test]
    fn header_validation_rejects_structural_faults() {
        let config = ChainConfig::default();
        let parent = sample_header();

        let mut child = sample_header();
        child.parent_hash = parent.hash();
        child.number = parent.number + 1;
        child.timestamp = parent.timestamp + 12;
        assert_eq!(validate_block_header(&child, &parent, &config), Ok(()));

        let mut skipped = child.clone();
        skipped.number = parent.number + 2;
        assert!(matches!(
            validate_block_header(&skipped, &parent, &config),
            Err(InvalidBlockError::NonSequentialNumber { .. })
        ));

        let mut stale = child.clone();
        stale.timestamp = parent.timestamp;
        assert!(matches!(
            validate_block_header(&stale, &parent, &config),
            Err(InvalidBlockError::StaleTimestamp { .. })
        ));

        let mut overdrawn = child.clone();
        overdrawn.gas_used = overdrawn.gas_limit + 1;
        assert!(matches!(
            validate_block_header(&overdrawn, &parent, &config),
            Err(InvalidBlockError::GasUsedAboveLimit { .. })
        ));

        let mut oversized = child.clone();
        oversized.extra_data = vec![0u8; MAX_EXTRA_DATA_SIZE + 1];
        assert!(matches!(
            validate_block_header(&oversized, &parent, &config),
            Err(InvalidBlockError::ExtraDataTooLong(_))
        ));

        let mut sealed_early = child.clone();
        sealed_early.base_fee_per_gas = Some(7);
        assert_eq!(
            validate_block_header(&sealed_early, &parent, &config),
            Err(InvalidBlockError::UnexpectedBaseFee)
        );
    }

    #[test]
    fn block_validation_checks_ommers_commitment() {
        let config = ChainConfig::default();
        let parent = sample_header();
        let mut child = sample_header();
        child.parent_hash = parent.hash();
        child.number = parent.number + 1;
        child.timestamp = parent.timestamp + 12;

        let block = Block::new(child.clone(), BlockBody::default());
        assert_eq!(validate_block(&block, &parent, &config), Ok(()));

        let mismatched = Block::new(
            child,
            BlockBody {
                transactions: vec![],
                ommers: vec![sample_header()],
            },
        );
        assert_eq!(
            validate_block(&mismatched, &parent, &config),
            Err(InvalidBlockError::OmmersHashMismatch)
        );
    }
}
