//! SatVault Electrum backend
//!
//! Answers the ledger's inclusion questions from an Electrum server: the
//! chain tip, block headers, and merkle branches for confirmed transactions.
//! [`ElectrumInclusionOracle`] wraps the client as the ledger's
//! [`satvault_ledger::InclusionOracle`].
//!
//! The server is trusted for the header chain only. Merkle branches are
//! folded locally against the header's merkle root (see [`proof`]), so a
//! lying server can at worst report a transaction as unconfirmed.
//!
//! ```ignore
//! use satvault_electrum::{default_server, ElectrumClient};
//! use bitcoin::Network;
//!
//! let client = ElectrumClient::new(default_server(Network::Bitcoin), Network::Bitcoin)?;
//! let proof = client.get_tx_proof(&txid, height)?;
//! ```

pub mod oracle;
pub mod proof;

use bitcoin::block::Header;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Network, TxMerkleNode, Txid};
use electrum_client::{ElectrumApi, Error as ElectrumError};
use satvault_ledger::TxProof;
use thiserror::Error;

pub use oracle::ElectrumInclusionOracle;
pub use proof::{compute_merkle_root, verify_merkle_proof};

/// Headers fetched per round trip while looking for a block
const HEADER_BATCH: u32 = 144;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot connect to Electrum server: {0}")]
    Connection(String),

    #[error("Electrum request failed: {0}")]
    Protocol(#[from] ElectrumError),

    #[error("No merkle branch for {0}")]
    TxNotFound(Txid),

    #[error("Block {0} not found near the tip")]
    BlockNotFound(BlockHash),
}

pub struct ElectrumClient {
    inner: electrum_client::Client,
    network: Network,
}

impl ElectrumClient {
    /// Connect to `url` (`ssl://host:port` or `tcp://host:port`).
    ///
    /// Plain TCP is accepted for local regtest servers but logged as a
    /// warning.
    pub fn new(url: &str, network: Network) -> Result<Self, Error> {
        if !url.starts_with("ssl://") {
            log::warn!("Electrum connection to {} is not encrypted", url);
        }
        let inner =
            electrum_client::Client::new(url).map_err(|e| Error::Connection(e.to_string()))?;
        log::debug!("Connected to Electrum server {} ({})", url, network);
        Ok(Self { inner, network })
    }

    /// Height of the best block
    pub fn get_height(&self) -> Result<u32, Error> {
        let tip = self.inner.block_headers_subscribe()?;
        Ok(tip.height as u32)
    }

    pub fn get_header(&self, height: u32) -> Result<Header, Error> {
        Ok(self.inner.block_header(height as usize)?)
    }

    /// Height of the block `hash`, searching at most `window` blocks below
    /// the tip. Returns the height and the tip height.
    pub fn find_block(&self, hash: &BlockHash, window: u32) -> Result<(u32, u32), Error> {
        let tip = self.get_height()?;
        let floor = tip.saturating_sub(window);

        // walk down from the tip in batches of headers
        let mut end = tip + 1;
        while end > floor {
            let start = end.saturating_sub(HEADER_BATCH).max(floor);
            let batch = self
                .inner
                .block_headers(start as usize, (end - start) as usize)?;
            if let Some(pos) = batch
                .headers
                .iter()
                .position(|header| header.block_hash() == *hash)
            {
                return Ok((start + pos as u32, tip));
            }
            end = start;
        }
        Err(Error::BlockNotFound(*hash))
    }

    /// Inclusion proof for `txid`, confirmed at `height`.
    pub fn get_tx_proof(&self, txid: &Txid, height: u32) -> Result<TxProof, Error> {
        let res = self
            .inner
            .transaction_get_merkle(txid, height as usize)
            .map_err(|_| Error::TxNotFound(*txid))?;
        let header = self.get_header(res.block_height as u32)?;
        Ok(TxProof {
            tx_block_blockhash: header.block_hash(),
            tx_index: res.pos as u64,
            merkle_proof: to_branch(&res.merkle),
        })
    }

    /// Transaction at position `pos` of the block at `height`, with its proof.
    pub fn get_tx_proof_at(&self, height: u32, pos: u64) -> Result<(Txid, TxProof), Error> {
        let res = self
            .inner
            .txid_from_pos_with_merkle(height as usize, pos as usize)?;
        let header = self.get_header(height)?;
        let proof = TxProof {
            tx_block_blockhash: header.block_hash(),
            tx_index: pos,
            merkle_proof: to_branch(&res.merkle),
        };
        Ok((res.tx_hash, proof))
    }

    pub fn network(&self) -> Network {
        self.network
    }
}

fn to_branch(nodes: &[[u8; 32]]) -> Vec<TxMerkleNode> {
    nodes
        .iter()
        .map(|node| TxMerkleNode::from_byte_array(*node))
        .collect()
}

/// Public Electrum server used when none is configured
pub fn default_server(network: Network) -> &'static str {
    match network {
        Network::Testnet => "ssl://electrum.blockstream.info:60004",
        Network::Signet => "ssl://mempool.space:60602",
        Network::Regtest => "tcp://127.0.0.1:60401",
        _ => "ssl://electrum.blockstream.info:60002",
    }
}
