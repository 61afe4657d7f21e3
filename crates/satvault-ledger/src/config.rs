//! Ledger parameters
//!
//! Set at initialization, changed afterwards only through owner-gated admin
//! operations. Also embedded in the server's TOML file as the `[ledger]`
//! section.

use crate::error::LedgerError;
use crate::types::Balance;
use bitcoin::absolute::LockTime;
use serde::{Deserialize, Serialize};

/// Ledger parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Identity of this ledger, mixed into custodian key derivation
    #[serde(default = "default_ledger_id")]
    pub ledger_id: String,

    /// Account allowed to run admin operations
    pub owner_id: String,

    /// Identity of the inclusion (light client) oracle
    #[serde(default = "default_inclusion_oracle_id")]
    pub inclusion_oracle_id: String,

    /// Identity of the threshold signing oracle
    #[serde(default = "default_signing_oracle_id")]
    pub signing_oracle_id: String,

    /// Identity of the BIP322 verifier, `None` disables BIP322 requests
    #[serde(default)]
    pub bip322_verifier_id: Option<String>,

    /// Confirmations an inclusion proof must carry
    #[serde(default = "default_n_confirmation")]
    pub n_confirmation: u64,

    /// Delay between queueing and signing a withdrawal (ms)
    #[serde(default = "default_withdrawal_waiting_time_ms")]
    pub withdrawal_waiting_time_ms: u64,

    #[serde(default)]
    pub min_deposit_satoshi: u64,

    /// Absolute locktime floor for deposit transactions, 0 disables the check
    #[serde(default)]
    pub earliest_deposit_block_height: u32,

    /// Permitted CSV heights of the solo path
    #[serde(default = "default_solo_withdrawal_seq_heights")]
    pub solo_withdrawal_seq_heights: Vec<u16>,

    /// Payment attached to each deposit submission
    #[serde(default)]
    pub deposit_storage_fee: Balance,
}

impl LedgerConfig {
    /// Defaults for everything but the owner.
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            ledger_id: default_ledger_id(),
            owner_id: owner_id.into(),
            inclusion_oracle_id: default_inclusion_oracle_id(),
            signing_oracle_id: default_signing_oracle_id(),
            bip322_verifier_id: None,
            n_confirmation: default_n_confirmation(),
            withdrawal_waiting_time_ms: default_withdrawal_waiting_time_ms(),
            min_deposit_satoshi: 0,
            earliest_deposit_block_height: 0,
            solo_withdrawal_seq_heights: default_solo_withdrawal_seq_heights(),
            deposit_storage_fee: 0,
        }
    }

    /// Check the parameters a ledger can run with.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.ledger_id.is_empty() {
            return Err(LedgerError::InvalidConfig("ledger_id is empty".into()));
        }
        if self.owner_id.is_empty() {
            return Err(LedgerError::InvalidConfig("owner_id is empty".into()));
        }
        if self.n_confirmation == 0 {
            return Err(LedgerError::InvalidConfig(
                "n_confirmation must be at least 1".into(),
            ));
        }
        if self.withdrawal_waiting_time_ms == 0 {
            return Err(LedgerError::InvalidConfig(
                "withdrawal_waiting_time_ms must be positive".into(),
            ));
        }
        if self.solo_withdrawal_seq_heights.is_empty() {
            return Err(LedgerError::InvalidConfig(
                "solo_withdrawal_seq_heights is empty".into(),
            ));
        }
        if LockTime::from_height(self.earliest_deposit_block_height).is_err() {
            return Err(LedgerError::InvalidConfig(
                "earliest_deposit_block_height must be a block height".into(),
            ));
        }
        if self.solo_withdrawal_seq_heights.contains(&0) {
            return Err(LedgerError::InvalidConfig(
                "solo_withdrawal_seq_heights must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// No owner; fails [`LedgerConfig::validate`] until one is set.
impl Default for LedgerConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

fn default_ledger_id() -> String {
    "satvault".into()
}

fn default_inclusion_oracle_id() -> String {
    "electrum".into()
}

fn default_signing_oracle_id() -> String {
    "signer".into()
}

fn default_n_confirmation() -> u64 {
    6
}

fn default_withdrawal_waiting_time_ms() -> u64 {
    // 2 days
    2 * 24 * 60 * 60 * 1000
}

fn default_solo_withdrawal_seq_heights() -> Vec<u16> {
    vec![144, 1008]
}
