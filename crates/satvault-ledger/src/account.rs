//! Accounts and deposits
//!
//! A deposit is keyed by its outpoint and lives in the ledger's global
//! deposit map. Accounts only hold outpoints, split into an active list and
//! a withdrawn list. A deposit appears in exactly one of them.

use crate::error::LedgerError;
use crate::types::{amount_serde, outpoint_list_serde, outpoint_serde, psbt_serde};
use bitcoin::{Amount, OutPoint, PublicKey, Psbt, ScriptBuf, Txid};
use satvault_script::build_deposit_script;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle of a deposit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Active,
    Withdrawn,
}

/// Version of the locking script a deposit pays to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedeemVersion {
    V1,
}

/// An admitted deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub user_pubkey: PublicKey,
    pub status: DepositStatus,
    pub redeem_version: RedeemVersion,
    /// The P2WSH output (txid:vout)
    #[serde(with = "outpoint_serde")]
    pub outpoint: OutPoint,
    /// Value in satoshis
    #[serde(with = "amount_serde")]
    pub value: Amount,
    /// CSV height of the solo path
    pub sequence: u16,
    /// When the withdrawal was finalized (ms), 0 while active
    pub complete_withdrawal_ts: u64,
    pub withdrawal_tx_id: Option<Txid>,
}

impl Deposit {
    pub fn new(user_pubkey: PublicKey, outpoint: OutPoint, value: Amount, sequence: u16) -> Self {
        Self {
            user_pubkey,
            status: DepositStatus::Active,
            redeem_version: RedeemVersion::V1,
            outpoint,
            value,
            sequence,
            complete_withdrawal_ts: 0,
            withdrawal_tx_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DepositStatus::Active
    }

    /// The witness script this deposit is locked with.
    pub fn witness_script(&self, custodian_pubkey: &PublicKey) -> ScriptBuf {
        match self.redeem_version {
            RedeemVersion::V1 => {
                build_deposit_script(&self.user_pubkey, custodian_pubkey, self.sequence)
            }
        }
    }

    pub(crate) fn mark_withdrawn(&mut self, withdrawal_tx_id: Txid, timestamp_ms: u64) {
        self.status = DepositStatus::Withdrawn;
        self.withdrawal_tx_id = Some(withdrawal_tx_id);
        self.complete_withdrawal_ts = timestamp_ms;
    }
}

/// A withdrawal PSBT the custodian is (co-)signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSignPsbt {
    #[serde(with = "psbt_serde")]
    pub psbt: Psbt,
    /// Output of the reinvest deposit, if the withdrawal keeps change in custody
    pub reinvest_deposit_vout: Option<u64>,
    /// Embed output describing the reinvest deposit
    pub reinvest_embed_vout: Option<u64>,
    /// Inputs the custodian has signed for the current unsigned transaction
    #[serde(default)]
    pub signed_inputs: BTreeSet<u32>,
}

impl PendingSignPsbt {
    pub fn new(
        psbt: Psbt,
        reinvest_deposit_vout: Option<u64>,
        reinvest_embed_vout: Option<u64>,
    ) -> Self {
        Self {
            psbt,
            reinvest_deposit_vout,
            reinvest_embed_vout,
            signed_inputs: BTreeSet::new(),
        }
    }

    pub fn txid(&self) -> Txid {
        self.psbt.unsigned_tx.compute_txid()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signed_inputs.len() == self.psbt.unsigned_tx.input.len()
    }

    /// Swap in a replacement PSBT. Signatures only carry over when the
    /// unsigned transaction is unchanged.
    pub(crate) fn replace(&mut self, psbt: Psbt) {
        if psbt.unsigned_tx.compute_txid() != self.txid() {
            self.signed_inputs.clear();
        }
        self.psbt = psbt;
    }
}

/// Per-user ledger record, keyed by public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub pubkey: PublicKey,
    /// Sum of active deposit values (sats)
    pub total_deposit: u64,
    pub queue_withdrawal_amount: u64,
    /// When the current queue was started (ms), 0 when nothing is queued
    pub queue_withdrawal_start_ts: u64,
    /// Replay counter for signed withdrawal requests
    pub nonce: u64,
    pub pending_sign_psbt: Option<PendingSignPsbt>,
    #[serde(with = "outpoint_list_serde")]
    active_deposits: Vec<OutPoint>,
    #[serde(with = "outpoint_list_serde")]
    withdrawn_deposits: Vec<OutPoint>,
}

impl Account {
    pub fn new(pubkey: PublicKey) -> Self {
        Self {
            pubkey,
            total_deposit: 0,
            queue_withdrawal_amount: 0,
            queue_withdrawal_start_ts: 0,
            nonce: 0,
            pending_sign_psbt: None,
            active_deposits: Vec::new(),
            withdrawn_deposits: Vec::new(),
        }
    }

    pub fn active_deposits(&self) -> &[OutPoint] {
        &self.active_deposits
    }

    pub fn withdrawn_deposits(&self) -> &[OutPoint] {
        &self.withdrawn_deposits
    }

    pub fn is_deposit_active(&self, outpoint: &OutPoint) -> bool {
        self.active_deposits.contains(outpoint)
    }

    /// When the current queue becomes signable, or 0 when nothing is queued.
    pub fn queue_withdrawal_end_ts(&self, waiting_time_ms: u64) -> u64 {
        if self.queue_withdrawal_start_ts == 0 {
            0
        } else {
            self.queue_withdrawal_start_ts.saturating_add(waiting_time_ms)
        }
    }

    pub(crate) fn add_active_deposit(&mut self, deposit: &Deposit) -> Result<(), LedgerError> {
        if self.withdrawn_deposits.contains(&deposit.outpoint) {
            return Err(LedgerError::DepositAlreadyWithdrawn);
        }
        if self.is_deposit_active(&deposit.outpoint) {
            return Err(LedgerError::DepositAlreadyActive);
        }
        self.total_deposit = self.total_deposit.saturating_add(deposit.value.to_sat());
        self.active_deposits.push(deposit.outpoint);
        Ok(())
    }

    pub(crate) fn move_to_withdrawn(&mut self, deposit: &Deposit) -> Result<(), LedgerError> {
        let idx = self
            .active_deposits
            .iter()
            .position(|o| o == &deposit.outpoint)
            .ok_or(LedgerError::DepositNotActive)?;
        if self.withdrawn_deposits.contains(&deposit.outpoint) {
            return Err(LedgerError::DepositAlreadyWithdrawn);
        }
        self.active_deposits.remove(idx);
        self.withdrawn_deposits.push(deposit.outpoint);
        self.total_deposit = self.total_deposit.saturating_sub(deposit.value.to_sat());
        Ok(())
    }

    /// Check that `amount` more can be queued. Never mutates.
    pub(crate) fn check_queue_amount(&self, amount: u64) -> Result<(), LedgerError> {
        match self.queue_withdrawal_amount.checked_add(amount) {
            Some(total) if total <= self.total_deposit => Ok(()),
            _ => Err(LedgerError::InvalidQueueAmount),
        }
    }

    /// Queue `amount` more for withdrawal. Consumes the nonce, restarts the
    /// waiting period and drops any pending PSBT.
    pub(crate) fn queue_withdrawal(&mut self, amount: u64, now_ms: u64) -> Result<(), LedgerError> {
        self.check_queue_amount(amount)?;
        self.nonce += 1;
        self.queue_withdrawal_amount += amount;
        self.queue_withdrawal_start_ts = now_ms;
        self.pending_sign_psbt = None;
        Ok(())
    }

    pub(crate) fn clear_queue(&mut self) {
        self.queue_withdrawal_amount = 0;
        self.queue_withdrawal_start_ts = 0;
    }

    /// Reduce the queue by what actually left custody, keeping it within
    /// the remaining balance.
    pub(crate) fn reconcile_queue(&mut self, withdrawn: u64) {
        self.queue_withdrawal_amount = self
            .queue_withdrawal_amount
            .saturating_sub(withdrawn)
            .min(self.total_deposit);
        if self.queue_withdrawal_amount == 0 {
            self.queue_withdrawal_start_ts = 0;
        }
    }
}
