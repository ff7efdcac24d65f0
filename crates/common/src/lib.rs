pub mod constants;
pub mod types;

pub use ethereum_types::{Address, Bloom, H64, H160, H256, U256};
