use std::fmt::Debug;

use basalt_common::types::BlockHeader;

/// Proof-of-work seal verification, delegated to the consensus engine that
/// drives this store. Structural header checks stay in the store; everything
/// involving the sealing algorithm (nonce/mix-hash evaluation, difficulty
/// schedules) lives behind this trait.
pub trait PowVerifier: Send + Sync + Debug {
    /// Returns true when the header carries a valid seal for its difficulty.
    fn verify_seal(&self, header: &BlockHeader) -> bool;
}
