//! Read-only views
//!
//! Everything a wallet or dashboard needs to build deposits and withdrawal
//! requests, in serializable form.

use crate::account::{Account, Deposit};
use crate::auth::withdrawal_message;
use crate::error::LedgerError;
use crate::state::LedgerState;
use crate::types::Balance;
use bitcoin::{OutPoint, PublicKey, Txid};
use satvault_script::{build_deposit_script, deposit_script_pubkey, DepositEmbedMsg};
use serde::{Deserialize, Serialize};

/// Ledger-wide parameters and counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub ledger_id: String,
    pub owner_id: String,
    pub pending_owner_id: Option<String>,
    pub paused: bool,
    pub root_pubkey: Option<String>,
    pub custodian_pubkey: Option<String>,
    pub inclusion_oracle_id: String,
    pub signing_oracle_id: String,
    pub bip322_verifier_id: Option<String>,
    pub n_confirmation: u64,
    pub withdrawal_waiting_time_ms: u64,
    pub min_deposit_satoshi: u64,
    pub earliest_deposit_block_height: u32,
    pub solo_withdrawal_seq_heights: Vec<u16>,
    pub deposit_storage_fee: Balance,
    pub accounts_len: u64,
    pub deposits_len: u64,
}

/// What a wallet needs to build a version 1 deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositConstantsV1 {
    pub custodian_pubkey: String,
    pub solo_withdrawal_seq_heights: Vec<u16>,
    pub earliest_deposit_block_height: u32,
    pub min_deposit_satoshi: u64,
    /// Present when a deposit was described
    pub deposit_script: Option<DepositScriptInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositScriptInfo {
    /// Hex witness script
    pub witness_script: String,
    /// Hex P2WSH output script
    pub script_pubkey: String,
    /// Hex embed payload (magic + message)
    pub embed_msg: String,
    /// Hex OP_RETURN output script
    pub embed_script: String,
}

/// What a wallet needs to request a withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalConstantsV1 {
    pub withdrawal_waiting_time_ms: u64,
    /// Message to sign for the next request
    pub withdrawal_msg: String,
}

/// Account with derived fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub pubkey: String,
    pub total_deposit: u64,
    pub queue_withdrawal_amount: u64,
    pub queue_withdrawal_start_ts: u64,
    pub queue_withdrawal_end_ts: u64,
    pub nonce: u64,
    pub pending_sign_psbt: Option<PendingPsbtView>,
    pub active_deposits_len: u64,
    pub withdrawn_deposits_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPsbtView {
    pub txid: Txid,
    pub psbt: String,
    pub reinvest_deposit_vout: Option<u64>,
    pub reinvest_embed_vout: Option<u64>,
    pub signed_inputs: Vec<u32>,
}

fn page<T: Clone>(items: impl Iterator<Item = T>, offset: usize, limit: usize) -> Vec<T> {
    items.skip(offset).take(limit).collect()
}

impl LedgerState {
    pub fn summary(&self) -> LedgerSummary {
        let config = &self.config;
        LedgerSummary {
            ledger_id: config.ledger_id.clone(),
            owner_id: config.owner_id.clone(),
            pending_owner_id: self.pending_owner_id.clone(),
            paused: self.paused,
            root_pubkey: self.root_pubkey.map(|k| k.to_string()),
            custodian_pubkey: self.custodian_pubkey().ok().map(|k| k.to_string()),
            inclusion_oracle_id: config.inclusion_oracle_id.clone(),
            signing_oracle_id: config.signing_oracle_id.clone(),
            bip322_verifier_id: config.bip322_verifier_id.clone(),
            n_confirmation: config.n_confirmation,
            withdrawal_waiting_time_ms: config.withdrawal_waiting_time_ms,
            min_deposit_satoshi: config.min_deposit_satoshi,
            earliest_deposit_block_height: config.earliest_deposit_block_height,
            solo_withdrawal_seq_heights: config.solo_withdrawal_seq_heights.clone(),
            deposit_storage_fee: config.deposit_storage_fee,
            accounts_len: self.accounts.len() as u64,
            deposits_len: self.deposits.len() as u64,
        }
    }

    /// Deposit parameters, plus the concrete scripts when `deposit` names
    /// `(deposit_vout, user_pubkey, sequence_height)`.
    pub fn v1_deposit_constants(
        &self,
        deposit: Option<(u64, &PublicKey, u16)>,
    ) -> Result<DepositConstantsV1, LedgerError> {
        let custodian = self.custodian_pubkey()?;
        let deposit_script = match deposit {
            Some((deposit_vout, user_pubkey, sequence_height)) => {
                let msg = DepositEmbedMsg::v1(deposit_vout, user_pubkey, sequence_height);
                Some(DepositScriptInfo {
                    witness_script: hex::encode(
                        build_deposit_script(user_pubkey, &custodian, sequence_height).as_bytes(),
                    ),
                    script_pubkey: hex::encode(
                        deposit_script_pubkey(user_pubkey, &custodian, sequence_height).as_bytes(),
                    ),
                    embed_msg: msg.encode_hex()?,
                    embed_script: hex::encode(msg.to_script()?.as_bytes()),
                })
            }
            None => None,
        };
        Ok(DepositConstantsV1 {
            custodian_pubkey: custodian.to_string(),
            solo_withdrawal_seq_heights: self.config.solo_withdrawal_seq_heights.clone(),
            earliest_deposit_block_height: self.config.earliest_deposit_block_height,
            min_deposit_satoshi: self.config.min_deposit_satoshi,
            deposit_script,
        })
    }

    pub fn v1_withdrawal_constants(
        &self,
        user_pubkey: &PublicKey,
        amount: u64,
    ) -> WithdrawalConstantsV1 {
        let nonce = self.account(user_pubkey).map_or(0, |a| a.nonce);
        WithdrawalConstantsV1 {
            withdrawal_waiting_time_ms: self.config.withdrawal_waiting_time_ms,
            withdrawal_msg: withdrawal_message(nonce, amount),
        }
    }

    pub fn accounts_len(&self) -> u64 {
        self.accounts.len() as u64
    }

    pub fn list_accounts(&self, offset: usize, limit: usize) -> Vec<AccountView> {
        page(self.accounts.values(), offset, limit)
            .into_iter()
            .map(|a| self.account_view(a))
            .collect()
    }

    /// The account of `user_pubkey`, or an empty one.
    pub fn view_account(&self, user_pubkey: &PublicKey) -> AccountView {
        match self.account(user_pubkey) {
            Some(account) => self.account_view(account),
            None => self.account_view(&Account::new(*user_pubkey)),
        }
    }

    fn account_view(&self, account: &Account) -> AccountView {
        AccountView {
            pubkey: account.pubkey.to_string(),
            total_deposit: account.total_deposit,
            queue_withdrawal_amount: account.queue_withdrawal_amount,
            queue_withdrawal_start_ts: account.queue_withdrawal_start_ts,
            queue_withdrawal_end_ts: account
                .queue_withdrawal_end_ts(self.config.withdrawal_waiting_time_ms),
            nonce: account.nonce,
            pending_sign_psbt: account.pending_sign_psbt.as_ref().map(|p| PendingPsbtView {
                txid: p.txid(),
                psbt: p.psbt.serialize_hex(),
                reinvest_deposit_vout: p.reinvest_deposit_vout,
                reinvest_embed_vout: p.reinvest_embed_vout,
                signed_inputs: p.signed_inputs.iter().copied().collect(),
            }),
            active_deposits_len: account.active_deposits().len() as u64,
            withdrawn_deposits_len: account.withdrawn_deposits().len() as u64,
        }
    }

    pub fn active_deposits_len(&self, user_pubkey: &PublicKey) -> u64 {
        self.account(user_pubkey)
            .map_or(0, |a| a.active_deposits().len() as u64)
    }

    pub fn list_active_deposits(
        &self,
        user_pubkey: &PublicKey,
        offset: usize,
        limit: usize,
    ) -> Vec<Deposit> {
        match self.account(user_pubkey) {
            Some(account) => self.deposits_page(account.active_deposits(), offset, limit),
            None => Vec::new(),
        }
    }

    pub fn withdrawn_deposits_len(&self, user_pubkey: &PublicKey) -> u64 {
        self.account(user_pubkey)
            .map_or(0, |a| a.withdrawn_deposits().len() as u64)
    }

    pub fn list_withdrawn_deposits(
        &self,
        user_pubkey: &PublicKey,
        offset: usize,
        limit: usize,
    ) -> Vec<Deposit> {
        match self.account(user_pubkey) {
            Some(account) => self.deposits_page(account.withdrawn_deposits(), offset, limit),
            None => Vec::new(),
        }
    }

    fn deposits_page(&self, outpoints: &[OutPoint], offset: usize, limit: usize) -> Vec<Deposit> {
        page(
            outpoints.iter().filter_map(|o| self.deposit(o)),
            offset,
            limit,
        )
        .into_iter()
        .cloned()
        .collect()
    }

    pub fn get_deposit(&self, tx_id: Txid, vout: u32) -> Option<Deposit> {
        self.deposit(&OutPoint::new(tx_id, vout)).cloned()
    }
}
