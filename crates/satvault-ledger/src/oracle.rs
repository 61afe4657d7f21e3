//! External oracles
//!
//! The ledger never talks to Bitcoin or holds key material. It consults three
//! asynchronous services:
//!
//! - [`InclusionOracle`]: is this transaction buried under enough blocks?
//! - [`SigningOracle`]: sign a 32-byte sighash with a derived custodian key
//! - [`Bip322Verifier`]: check a BIP322 "full" signature (optional)
//!
//! Every call is a suspension point. Whatever the ledger checked before the
//! call is checked again when the answer arrives.

use async_trait::async_trait;
use bitcoin::secp256k1::ecdsa;
use bitcoin::{BlockHash, PublicKey, TxMerkleNode, Txid};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors from an oracle round trip
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid oracle response: {0}")]
    InvalidResponse(String),
}

/// Where a transaction sits in the chain, as supplied by the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxProof {
    pub tx_block_blockhash: BlockHash,
    /// Position of the transaction in its block
    pub tx_index: u64,
    /// Sibling hashes from the leaf up to the merkle root
    pub merkle_proof: Vec<TxMerkleNode>,
}

/// Full request handed to the inclusion oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub tx_id: Txid,
    pub tx_block_blockhash: BlockHash,
    pub tx_index: u64,
    pub merkle_proof: Vec<TxMerkleNode>,
    pub confirmations: u64,
}

impl InclusionProof {
    pub fn new(tx_id: Txid, proof: TxProof, confirmations: u64) -> Self {
        Self {
            tx_id,
            tx_block_blockhash: proof.tx_block_blockhash,
            tx_index: proof.tx_index,
            merkle_proof: proof.merkle_proof,
            confirmations,
        }
    }
}

/// Bitcoin light client
#[async_trait]
pub trait InclusionOracle: Send + Sync {
    fn id(&self) -> &str;

    /// `Ok(true)` when the proof is valid and the block has at least
    /// `proof.confirmations` confirmations.
    async fn verify_transaction_inclusion(&self, proof: &InclusionProof)
        -> Result<bool, OracleError>;
}

/// A signing request for the custodian key at `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub payload: [u8; 32],
    pub path: String,
    pub key_version: u32,
}

/// What the signing oracle returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Signed(ecdsa::Signature),
    Failed(String),
}

/// Threshold signer holding the custodian root key
#[async_trait]
pub trait SigningOracle: Send + Sync {
    fn id(&self) -> &str;

    async fn root_public_key(&self) -> Result<PublicKey, OracleError>;

    async fn sign(&self, request: SignRequest) -> SignOutcome;
}

/// BIP322 "full" signature verifier
#[async_trait]
pub trait Bip322Verifier: Send + Sync {
    fn id(&self) -> &str;

    async fn verify_bip322_full(
        &self,
        pubkey: &PublicKey,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<bool, OracleError>;
}

/// Handles to the oracles a ledger talks to
#[derive(Clone)]
pub struct Oracles {
    pub inclusion: Arc<dyn InclusionOracle>,
    pub signer: Arc<dyn SigningOracle>,
    pub bip322: Option<Arc<dyn Bip322Verifier>>,
}

impl Oracles {
    pub fn new(inclusion: Arc<dyn InclusionOracle>, signer: Arc<dyn SigningOracle>) -> Self {
        Self {
            inclusion,
            signer,
            bip322: None,
        }
    }

    pub fn with_bip322(mut self, verifier: Arc<dyn Bip322Verifier>) -> Self {
        self.bip322 = Some(verifier);
        self
    }
}

impl fmt::Debug for Oracles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Oracles")
            .field("inclusion", &self.inclusion.id())
            .field("signer", &self.signer.id())
            .field("bip322", &self.bip322.as_ref().map(|v| v.id()))
            .finish()
    }
}
