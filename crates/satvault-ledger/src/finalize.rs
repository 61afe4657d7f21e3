//! Withdrawal finalization
//!
//! Anyone may submit a confirmed transaction spending a user's active
//! deposits. Each spent deposit moves to the withdrawn set, a reinvest output
//! described by the pending PSBT is admitted as a new deposit, and the queue
//! shrinks by the value that actually left custody.

use crate::account::Deposit;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::oracle::{InclusionProof, TxProof};
use crate::state::LedgerState;
use crate::types::CallContext;
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::relative;
use bitcoin::{OutPoint, PublicKey, Transaction, TxIn};
use satvault_script::{classify_witness, RedeemPath};

/// Which redeem path spent `deposit`, if the witness is one of ours.
fn check_withdrawal_witness(
    input: &TxIn,
    deposit: &Deposit,
    custodian_pubkey: &PublicKey,
) -> Result<RedeemPath, LedgerError> {
    let script = deposit.witness_script(custodian_pubkey);
    if input.witness.last() != Some(script.as_bytes()) {
        return Err(LedgerError::InvalidWithdrawalWitness);
    }
    match classify_witness(&input.witness) {
        RedeemPath::Cooperative => Ok(RedeemPath::Cooperative),
        RedeemPath::Solo => match input.sequence.to_relative_lock_time() {
            Some(relative::LockTime::Blocks(height)) if height.value() >= deposit.sequence => {
                Ok(RedeemPath::Solo)
            }
            _ => Err(LedgerError::InvalidWithdrawalWitness),
        },
        RedeemPath::Unknown => Err(LedgerError::InvalidWithdrawalWitness),
    }
}

impl LedgerState {
    /// Inputs of `tx` spending active deposits of `user_pubkey`.
    pub(crate) fn withdrawal_inputs(
        &self,
        tx: &Transaction,
        user_pubkey: &PublicKey,
    ) -> Result<Vec<(usize, OutPoint)>, LedgerError> {
        let account = self
            .account(user_pubkey)
            .ok_or(LedgerError::NotWithdrawalTx)?;
        let spent: Vec<(usize, OutPoint)> = tx
            .input
            .iter()
            .enumerate()
            .filter(|(_, input)| account.is_deposit_active(&input.previous_output))
            .map(|(idx, input)| (idx, input.previous_output))
            .collect();
        if spent.is_empty() {
            return Err(LedgerError::NotWithdrawalTx);
        }
        Ok(spent)
    }

    /// The reinvest deposit, when `tx` is the pending PSBT's transaction.
    fn reinvest_deposit(&self, tx: &Transaction, user_pubkey: &PublicKey) -> Option<Deposit> {
        let pending = self.account(user_pubkey)?.pending_sign_psbt.as_ref()?;
        if pending.txid() != tx.compute_txid() {
            return None;
        }
        let embed_vout = pending.reinvest_embed_vout?;
        match self.verify_deposit_txn(tx, embed_vout) {
            Ok(deposit) if &deposit.user_pubkey == user_pubkey => {
                if self.is_deposit_saved(&deposit.outpoint) {
                    None
                } else {
                    Some(deposit)
                }
            }
            Ok(_) => None,
            Err(e) => {
                // the user can still admit it through a regular deposit submission
                log::warn!("Reinvest output of {} not admitted: {}", tx.compute_txid(), e);
                None
            }
        }
    }

    pub(crate) fn finalize_withdrawal(
        &mut self,
        user_pubkey: &PublicKey,
        tx: &Transaction,
        now_ms: u64,
    ) -> Result<(), LedgerError> {
        let txid = tx.compute_txid();
        let custodian = self.custodian_pubkey()?;
        let spent = self.withdrawal_inputs(tx, user_pubkey)?;

        // validate everything before touching state
        let mut paths = Vec::with_capacity(spent.len());
        let mut consumed: u64 = 0;
        for (idx, outpoint) in &spent {
            let deposit = self
                .deposit(outpoint)
                .ok_or(LedgerError::DepositNotActive)?;
            paths.push(check_withdrawal_witness(&tx.input[*idx], deposit, &custodian)?);
            consumed = consumed.saturating_add(deposit.value.to_sat());
        }
        let reinvest = self.reinvest_deposit(tx, user_pubkey);
        let reinvested = reinvest.as_ref().map_or(0, |d| d.value.to_sat());

        for ((_, outpoint), path) in spent.iter().zip(paths) {
            self.complete_withdrawal(user_pubkey, outpoint, txid, now_ms, path)?;
        }
        if let Some(deposit) = reinvest {
            self.save_deposit(deposit)?;
        }

        let Some(account) = self.accounts.get_mut(user_pubkey) else {
            return Ok(());
        };
        account.reconcile_queue(consumed.saturating_sub(reinvested));

        let pending_done = account.pending_sign_psbt.as_ref().map_or(false, |pending| {
            pending.txid() == txid
                || pending
                    .psbt
                    .unsigned_tx
                    .input
                    .iter()
                    .all(|input| !account.is_deposit_active(&input.previous_output))
        });
        if pending_done {
            account.pending_sign_psbt = None;
        }

        log::info!(
            "Withdrawal {} finalized for {}: {} deposits, {} sats out",
            txid,
            user_pubkey,
            spent.len(),
            consumed.saturating_sub(reinvested)
        );
        Ok(())
    }
}

impl Ledger {
    /// Record a confirmed withdrawal of `user_pubkey`'s deposits.
    ///
    /// Returns `Ok(false)` when the oracle does not confirm inclusion.
    pub async fn submit_withdrawal_tx(
        &mut self,
        ctx: &CallContext,
        tx_hex: &str,
        user_pubkey: &PublicKey,
        proof: TxProof,
    ) -> Result<bool, LedgerError> {
        self.state.assert_running()?;
        let tx: Transaction =
            deserialize_hex(tx_hex).map_err(|_| LedgerError::InvalidWithdrawalTxHex)?;
        self.state.withdrawal_inputs(&tx, user_pubkey)?;

        let inclusion = InclusionProof::new(
            tx.compute_txid(),
            proof,
            self.state.config.n_confirmation,
        );
        let confirmed = match self
            .oracles
            .inclusion
            .verify_transaction_inclusion(&inclusion)
            .await
        {
            Ok(confirmed) => confirmed,
            Err(e) => {
                log::warn!("Inclusion check for {} failed: {}", inclusion.tx_id, e);
                false
            }
        };
        self.on_verify_withdrawal_tx(ctx, user_pubkey, &tx, confirmed)
    }

    fn on_verify_withdrawal_tx(
        &mut self,
        ctx: &CallContext,
        user_pubkey: &PublicKey,
        tx: &Transaction,
        confirmed: bool,
    ) -> Result<bool, LedgerError> {
        if !confirmed {
            log::warn!("Withdrawal {} not confirmed", tx.compute_txid());
            return Ok(false);
        }
        self.state
            .finalize_withdrawal(user_pubkey, tx, ctx.timestamp_ms)?;
        Ok(true)
    }
}
