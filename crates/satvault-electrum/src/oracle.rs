//! Inclusion oracle backed by an Electrum server
//!
//! The submitted block hash is located among recent headers, the merkle
//! branch is checked against that header, and the depth below the tip must
//! reach the requested confirmations. The blocking Electrum client runs on
//! tokio's blocking pool.

use crate::proof::verify_merkle_proof;
use crate::{ElectrumClient, Error};
use async_trait::async_trait;
use satvault_ledger::{InclusionOracle, InclusionProof, OracleError};
use std::sync::Arc;

/// How far below the tip a submitted block may be (about two weeks)
pub const DEFAULT_SEARCH_WINDOW: u32 = 2016;

pub struct ElectrumInclusionOracle {
    client: Arc<ElectrumClient>,
    search_window: u32,
}

impl ElectrumInclusionOracle {
    pub fn new(client: ElectrumClient) -> Self {
        Self {
            client: Arc::new(client),
            search_window: DEFAULT_SEARCH_WINDOW,
        }
    }

    pub fn with_search_window(mut self, blocks: u32) -> Self {
        self.search_window = blocks;
        self
    }

    pub fn client(&self) -> &ElectrumClient {
        &self.client
    }

    /// Blocking check; `Ok(false)` for proofs that do not hold.
    pub fn check_inclusion(&self, proof: &InclusionProof) -> Result<bool, Error> {
        check_inclusion(&self.client, proof, self.search_window)
    }
}

fn check_inclusion(
    client: &ElectrumClient,
    proof: &InclusionProof,
    search_window: u32,
) -> Result<bool, Error> {
    let (height, tip) = match client.find_block(&proof.tx_block_blockhash, search_window) {
        Ok(found) => found,
        Err(Error::BlockNotFound(hash)) => {
            log::warn!("Block {} not within {} blocks of the tip", hash, search_window);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    let header = client.get_header(height)?;
    if !verify_merkle_proof(&header, &proof.tx_id, proof.tx_index, &proof.merkle_proof) {
        log::warn!("Merkle proof for {} does not match block {}", proof.tx_id, height);
        return Ok(false);
    }

    let depth = u64::from(tip.saturating_sub(height)) + 1;
    log::debug!(
        "{} at height {} has {} confirmations (need {})",
        proof.tx_id,
        height,
        depth,
        proof.confirmations
    );
    Ok(depth >= proof.confirmations)
}

#[async_trait]
impl InclusionOracle for ElectrumInclusionOracle {
    fn id(&self) -> &str {
        "electrum"
    }

    async fn verify_transaction_inclusion(
        &self,
        proof: &InclusionProof,
    ) -> Result<bool, OracleError> {
        let client = self.client.clone();
        let proof = proof.clone();
        let window = self.search_window;
        tokio::task::spawn_blocking(move || check_inclusion(&client, &proof, window))
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?
            .map_err(|e| OracleError::Unavailable(e.to_string()))
    }
}
