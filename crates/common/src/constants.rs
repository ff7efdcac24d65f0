use ethereum_types::H256;
use hex_literal::hex;

/// Keccak-256 of the RLP encoding of an empty ommers list.
pub const EMPTY_OMMERS_HASH: H256 = H256(hex!(
    "1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347"
));

/// Root hash of an empty Merkle-Patricia trie.
pub const EMPTY_TRIE_ROOT: H256 = H256(hex!(
    "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
));

/// Protocol bound on the header extra-data field.
pub const MAX_EXTRA_DATA_SIZE: usize = 32;

/// Base fee of the first block after the London activation.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;
