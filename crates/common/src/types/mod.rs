mod block;
mod genesis;
mod transaction;

pub use block::{
    validate_block, validate_block_header, Block, BlockBody, BlockHash, BlockHeader, BlockNumber,
    InvalidBlockError,
};
pub use genesis::{ChainConfig, Genesis};
pub use transaction::Transaction;
