//! Deposit admission
//!
//! A deposit transaction must carry a zero-value embed output naming the
//! depositor and timelock, and pay to the P2WSH of the matching deposit
//! script. Checks run in a fixed order so the first failure is deterministic.

use crate::account::Deposit;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::oracle::{InclusionProof, TxProof};
use crate::state::LedgerState;
use crate::types::CallContext;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::{OutPoint, Transaction};
use satvault_script::{deposit_script_pubkey, DepositEmbedMsg};

impl LedgerState {
    /// Check a deposit transaction against the current policy and build the
    /// deposit it would create. Does not look at the deposit map.
    pub fn verify_deposit_txn(
        &self,
        tx: &Transaction,
        embed_vout: u64,
    ) -> Result<Deposit, LedgerError> {
        let embed_output = usize::try_from(embed_vout)
            .ok()
            .and_then(|i| tx.output.get(i))
            .ok_or(LedgerError::BadEmbedIndex)?;
        let embed = DepositEmbedMsg::from_output(embed_output)?;
        let user_pubkey = embed.user_pubkey()?;
        let sequence = embed.sequence_height();

        let deposit_vout =
            u32::try_from(embed.deposit_vout()).map_err(|_| LedgerError::BadDepositIndex)?;
        let deposit_output = tx
            .output
            .get(deposit_vout as usize)
            .ok_or(LedgerError::BadDepositIndex)?;
        if !deposit_output.script_pubkey.is_p2wsh() {
            return Err(LedgerError::DepositNotP2wsh);
        }
        let custodian = self.custodian_pubkey()?;
        if deposit_output.script_pubkey != deposit_script_pubkey(&user_pubkey, &custodian, sequence)
        {
            return Err(LedgerError::DepositBadScriptHash);
        }

        let heights = &self.config.solo_withdrawal_seq_heights;
        if !heights.contains(&sequence) {
            return Err(LedgerError::InvalidSeqHeight(heights.clone()));
        }
        if deposit_output.value.to_sat() < self.config.min_deposit_satoshi {
            return Err(LedgerError::DepositBelowMinimum);
        }
        self.verify_deposit_locktime(tx)?;

        Ok(Deposit::new(
            user_pubkey,
            OutPoint::new(tx.compute_txid(), deposit_vout),
            deposit_output.value,
            sequence,
        ))
    }

    /// Deposits must not be minable before the configured height, which
    /// keeps them off pre-deployment forks.
    fn verify_deposit_locktime(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let floor = self.config.earliest_deposit_block_height;
        if floor == 0 {
            return Ok(());
        }
        if !tx.input.iter().all(|i| i.sequence.enables_absolute_lock_time()) {
            return Err(LedgerError::AbsoluteTimelockNotEnabled);
        }
        let required = LockTime::from_height(floor).map_err(|_| LedgerError::WrongLocktime(floor))?;
        if !required.is_implied_by(tx.lock_time) {
            return Err(LedgerError::WrongLocktime(floor));
        }
        Ok(())
    }

    /// Everything [`Ledger::submit_deposit_tx`] checks before asking the
    /// inclusion oracle, without side effects.
    pub fn dry_run_deposit(&self, tx_hex: &str, embed_vout: u64) -> Result<Deposit, LedgerError> {
        let tx: Transaction = deserialize_hex(tx_hex).map_err(|_| LedgerError::InvalidTxHex)?;
        let deposit = self.verify_deposit_txn(&tx, embed_vout)?;
        if self.is_deposit_saved(&deposit.outpoint) {
            return Err(LedgerError::DepositAlreadySaved);
        }
        Ok(deposit)
    }
}

impl Ledger {
    /// Admit a confirmed deposit.
    ///
    /// `ctx.attached` must cover the storage fee. Returns `Ok(false)` and
    /// refunds the whole payment when the oracle does not confirm inclusion.
    pub async fn submit_deposit_tx(
        &mut self,
        ctx: &CallContext,
        tx_hex: &str,
        embed_vout: u64,
        proof: TxProof,
    ) -> Result<bool, LedgerError> {
        self.state.assert_running()?;
        if ctx.attached < self.state.config.deposit_storage_fee {
            return Err(LedgerError::NotEnoughPayment);
        }
        let tx: Transaction = deserialize_hex(tx_hex).map_err(|_| LedgerError::InvalidTxHex)?;
        let deposit = self.state.verify_deposit_txn(&tx, embed_vout)?;
        if self.state.is_deposit_saved(&deposit.outpoint) {
            return Err(LedgerError::DepositAlreadySaved);
        }

        let inclusion = InclusionProof::new(
            deposit.outpoint.txid,
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
                log::warn!("Inclusion check for {} failed: {}", deposit.outpoint, e);
                false
            }
        };
        self.on_verify_deposit_tx(ctx, deposit, confirmed)
    }

    fn on_verify_deposit_tx(
        &mut self,
        ctx: &CallContext,
        deposit: Deposit,
        confirmed: bool,
    ) -> Result<bool, LedgerError> {
        if !confirmed {
            log::warn!("Deposit {} not confirmed", deposit.outpoint);
            self.state
                .refund(&ctx.caller, ctx.attached, "Deposit not confirmed");
            return Ok(false);
        }
        if let Err(e) = self.state.save_deposit(deposit) {
            self.state.refund(&ctx.caller, ctx.attached, &e.to_string());
            return Err(e);
        }
        let excess = ctx
            .attached
            .saturating_sub(self.state.config.deposit_storage_fee);
        self.state.refund(&ctx.caller, excess, "Excess storage payment");
        Ok(true)
    }
}
