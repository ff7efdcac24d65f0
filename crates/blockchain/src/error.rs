use basalt_common::types::{BlockHash, BlockNumber, InvalidBlockError};
use basalt_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid block: {0}")]
    InvalidBlock(#[from] InvalidBlockError),
    #[error("invalid proof of work seal for block {0:#x}")]
    InvalidSeal(BlockHash),
    #[error("transaction chain id {found} does not match chain id {expected}")]
    ChainIdMismatch { expected: u64, found: u64 },
    #[error("stored genesis block does not match the configured chain")]
    GenesisMismatch,
    #[error("a genesis block is already stored for this chain")]
    GenesisAlreadyStored,
    #[error("parent of block {0:#x} is not stored")]
    ParentNotFound(BlockHash),
    #[error("missing parent header at number {0} while rewiring the canonical chain")]
    MissingCanonicalParent(BlockNumber),
    #[error("block {0:#x} is not stored")]
    BlockNotFound(BlockHash),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Custom(String),
}
