//! Operator commands: ledger views, dry runs and inclusion checks.

use crate::config::ServerConfig;
use anyhow::{Context, Result};
use bitcoin::{BlockHash, PublicKey, TxMerkleNode, Txid};
use satvault_electrum::{ElectrumClient, ElectrumInclusionOracle};
use satvault_ledger::{InclusionOracle, InclusionProof, LedgerState, TxProof};
use serde_json::json;
use std::str::FromStr;

/// Load the ledger snapshot, or start from the configured parameters.
pub fn open_state(config: &ServerConfig) -> Result<LedgerState> {
    let path = config.state_path();
    let state = LedgerState::load_or_new(&path, config.ledger.clone())
        .with_context(|| format!("Failed to open ledger state at {}", path.display()))?;
    log::debug!(
        "Ledger state {}: {} accounts",
        path.display(),
        state.accounts_len()
    );
    Ok(state)
}

fn parse_pubkey(s: &str) -> Result<PublicKey> {
    PublicKey::from_str(s).with_context(|| format!("Invalid public key: {}", s))
}

pub fn summary(state: &LedgerState) -> Result<String> {
    Ok(serde_json::to_string_pretty(&state.summary())?)
}

pub fn account(state: &LedgerState, pubkey: &str) -> Result<String> {
    let pubkey = parse_pubkey(pubkey)?;
    Ok(serde_json::to_string_pretty(&state.view_account(&pubkey))?)
}

/// Active and withdrawn deposits of one user.
pub fn deposits(state: &LedgerState, pubkey: &str) -> Result<String> {
    let pubkey = parse_pubkey(pubkey)?;
    let active = state.list_active_deposits(&pubkey, 0, usize::MAX);
    let withdrawn = state.list_withdrawn_deposits(&pubkey, 0, usize::MAX);
    Ok(serde_json::to_string_pretty(&json!({
        "active": active,
        "withdrawn": withdrawn,
    }))?)
}

/// Admission checks for a deposit transaction, without an inclusion proof.
pub fn dry_run_deposit(state: &LedgerState, tx_hex: &str, embed_vout: u64) -> Result<String> {
    let deposit = state
        .dry_run_deposit(tx_hex, embed_vout)
        .context("Deposit would be rejected")?;
    Ok(serde_json::to_string_pretty(&deposit)?)
}

/// Build a proof from CLI arguments. `merkle_proof` is a comma-separated
/// list of sibling hashes, leaf level first.
pub fn parse_proof(block_hash: &str, tx_index: u64, merkle_proof: &str) -> Result<TxProof> {
    let tx_block_blockhash = BlockHash::from_str(block_hash)
        .with_context(|| format!("Invalid block hash: {}", block_hash))?;
    let merkle_proof = merkle_proof
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            TxMerkleNode::from_str(s).with_context(|| format!("Invalid merkle node: {}", s))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TxProof {
        tx_block_blockhash,
        tx_index,
        merkle_proof,
    })
}

/// Ask the Electrum-backed oracle whether `txid` is buried deep enough.
pub async fn check_inclusion(config: &ServerConfig, txid: &str, proof: TxProof) -> Result<bool> {
    let txid = Txid::from_str(txid).with_context(|| format!("Invalid txid: {}", txid))?;
    let client = ElectrumClient::new(&config.bitcoin.electrum_url, config.network())
        .with_context(|| {
            format!(
                "Failed to connect to Electrum at {}",
                config.bitcoin.electrum_url
            )
        })?;
    let oracle =
        ElectrumInclusionOracle::new(client).with_search_window(config.bitcoin.search_window);

    let request = InclusionProof::new(txid, proof, config.ledger.n_confirmation);
    let confirmed = oracle
        .verify_transaction_inclusion(&request)
        .await
        .context("Inclusion check failed")?;
    log::info!(
        "{}: {} ({} confirmations required)",
        txid,
        if confirmed { "confirmed" } else { "not confirmed" },
        request.confirmations
    );
    Ok(confirmed)
}
