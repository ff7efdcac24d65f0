//! Binary key layout, byte-for-byte compatible with databases written by
//! Geth-lineage clients. The prefix and suffix bytes are wire-format
//! constants; changing any of them orphans existing data.

use basalt_common::types::{BlockHash, BlockNumber};

/// Reserved key holding the hash of the highest-difficulty header.
pub const HEAD_HEADER_KEY: &[u8] = b"LastHeader";
/// Reserved key holding the hash of the highest-difficulty full block.
pub const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";
/// Reserved key holding the JSON iterator-heads index.
pub const ITERATOR_HEADS_KEY: &[u8] = b"heads";

const HEADER_PREFIX: u8 = b'h';
const BODY_PREFIX: u8 = b'b';
const HASH_TO_NUMBER_PREFIX: u8 = b'H';
const NUMBER_SUFFIX: u8 = b'n';
const TOTAL_DIFFICULTY_SUFFIX: u8 = b't';

fn number_and_hash(prefix: u8, number: BlockNumber, hash: &BlockHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(41);
    key.push(prefix);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `'h' ++ be8(number) ++ hash` → RLP(header)
pub fn header_key(number: BlockNumber, hash: &BlockHash) -> Vec<u8> {
    number_and_hash(HEADER_PREFIX, number, hash)
}

/// `'b' ++ be8(number) ++ hash` → RLP([transactions, ommers])
pub fn body_key(number: BlockNumber, hash: &BlockHash) -> Vec<u8> {
    number_and_hash(BODY_PREFIX, number, hash)
}

/// `'h' ++ be8(number) ++ hash ++ 't'` → RLP(total difficulty)
pub fn total_difficulty_key(number: BlockNumber, hash: &BlockHash) -> Vec<u8> {
    let mut key = number_and_hash(HEADER_PREFIX, number, hash);
    key.push(TOTAL_DIFFICULTY_SUFFIX);
    key
}

/// `'h' ++ be8(number) ++ 'n'` → canonical hash at that height
pub fn number_to_hash_key(number: BlockNumber) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.push(HEADER_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key.push(NUMBER_SUFFIX);
    key
}

/// `'H' ++ hash` → big-endian 8-byte block number
pub fn hash_to_number_key(hash: &BlockHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(HASH_TO_NUMBER_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}
