//! Merkle branch checks
//!
//! A branch lists sibling hashes from the transaction up to the root. Bit
//! `i` of the transaction index says whether the running hash is the right
//! (1) or left (0) child at level `i`.

use bitcoin::block::Header;
use bitcoin::hashes::{sha256d, Hash, HashEngine};
use bitcoin::{TxMerkleNode, Txid};

// deeper than any block can be
const MAX_DEPTH: usize = 32;

/// Merkle root implied by `branch` for `txid` at position `index`.
///
/// `None` when `index` does not fit in a tree of the branch's depth.
pub fn compute_merkle_root(
    txid: &Txid,
    index: u64,
    branch: &[TxMerkleNode],
) -> Option<TxMerkleNode> {
    if branch.len() > MAX_DEPTH || index >> branch.len() != 0 {
        return None;
    }
    let mut current = txid.to_raw_hash();
    for (level, sibling) in branch.iter().enumerate() {
        let mut engine = sha256d::Hash::engine();
        if (index >> level) & 1 == 1 {
            engine.input(sibling.as_byte_array());
            engine.input(current.as_byte_array());
        } else {
            engine.input(current.as_byte_array());
            engine.input(sibling.as_byte_array());
        }
        current = sha256d::Hash::from_engine(engine);
    }
    Some(TxMerkleNode::from_raw_hash(current))
}

/// Does `branch` connect `txid` to the merkle root of `header`?
pub fn verify_merkle_proof(
    header: &Header,
    txid: &Txid,
    index: u64,
    branch: &[TxMerkleNode],
) -> bool {
    compute_merkle_root(txid, index, branch) == Some(header.merkle_root)
}
