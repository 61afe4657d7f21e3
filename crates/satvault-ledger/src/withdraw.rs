//! Withdrawal PSBT signing
//!
//! A user with a matured withdrawal queue submits a PSBT spending some of
//! their active deposits, partially signed with their own key. Once it
//! passes validation the ledger records it as the account's pending PSBT and
//! asks the signing oracle for the custodian half of one input at a time.
//!
//! While a PSBT is pending, a replacement (fee bump) is accepted when it
//! spends the same inputs and keeps the same reinvest output. Replacements
//! skip the queue and waiting-period checks, since the queue may already
//! have been cleared by a completed signing round.

use crate::account::{Account, PendingSignPsbt};
use crate::error::LedgerError;
use crate::events::LedgerEvent;
use crate::ledger::Ledger;
use crate::oracle::{SignOutcome, SignRequest};
use crate::state::LedgerState;
use crate::types::{CallContext, CUSTODIAN_KEY_VERSION_V1, CUSTODIAN_PATH_V1};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::sighash::{EcdsaSighashType, SegwitV0Sighash};
use bitcoin::{ecdsa, PublicKey, Psbt, Txid};
use satvault_script::{p2wsh_sighash, sighash_message};

/// A validated signing request
#[derive(Debug, Clone)]
pub(crate) struct SignPlan {
    pub psbt: Psbt,
    pub txid: Txid,
    pub vin: usize,
    pub sighash: SegwitV0Sighash,
    pub reinvest_deposit_vout: Option<u64>,
    pub reinvest_embed_vout: Option<u64>,
}

/// Outcome of a successful dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignPreview {
    pub txid: Txid,
    /// Payload the signing oracle would be asked to sign
    pub sighash: SegwitV0Sighash,
    /// Whether the PSBT would replace the pending one
    pub replaces_pending: bool,
}

fn parse_psbt_hex(psbt_hex: &str) -> Result<Psbt, LedgerError> {
    let bytes = hex::decode(psbt_hex).map_err(|_| LedgerError::InvalidPsbtHex)?;
    Psbt::deserialize(&bytes).map_err(|_| LedgerError::InvalidPsbtHex)
}

/// A replacement must spend exactly the pending inputs and keep the
/// reinvest output.
fn verify_replacement(pending: &PendingSignPsbt, psbt: &Psbt) -> Result<(), LedgerError> {
    let expected = &pending.psbt.unsigned_tx;
    let actual = &psbt.unsigned_tx;
    if expected.input.len() != actual.input.len() {
        return Err(LedgerError::PsbtInputLenMismatch);
    }
    if expected.input.iter().zip(&actual.input).any(|(a, b)| a != b) {
        return Err(LedgerError::PsbtInputMismatch);
    }
    if let Some(vout) = pending.reinvest_deposit_vout {
        let idx = usize::try_from(vout).map_err(|_| LedgerError::PsbtReinvestOutputMismatch)?;
        match (expected.output.get(idx), actual.output.get(idx)) {
            (Some(a), Some(b)) if a == b => {}
            _ => return Err(LedgerError::PsbtReinvestOutputMismatch),
        }
    }
    Ok(())
}

fn verify_partial_sig(
    psbt: &Psbt,
    vin: usize,
    user_pubkey: &PublicKey,
    sighash: &SegwitV0Sighash,
) -> Result<(), LedgerError> {
    let sig = psbt.inputs[vin]
        .partial_sigs
        .get(user_pubkey)
        .ok_or(LedgerError::MissingPartialSig)?;
    if sig.sighash_type != EcdsaSighashType::All {
        return Err(LedgerError::InvalidPartialSig);
    }
    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(&sighash_message(sighash), &sig.signature, &user_pubkey.inner)
        .map_err(|_| LedgerError::InvalidPartialSig)
}

impl LedgerState {
    pub(crate) fn prepare_sign_withdrawal(
        &self,
        psbt_hex: &str,
        user_pubkey: &PublicKey,
        vin: usize,
        reinvest_embed_vout: Option<u64>,
        now_ms: u64,
    ) -> Result<SignPlan, LedgerError> {
        let psbt = parse_psbt_hex(psbt_hex)?;
        if vin >= psbt.unsigned_tx.input.len() || vin >= psbt.inputs.len() {
            return Err(LedgerError::BadInputIndex);
        }
        let account = self
            .account(user_pubkey)
            .ok_or(LedgerError::NoWithdrawalRequest)?;
        let pending = account.pending_sign_psbt.as_ref();

        match pending {
            Some(pending) => verify_replacement(pending, &psbt)?,
            None => {
                if account.queue_withdrawal_amount == 0 || account.queue_withdrawal_start_ts == 0 {
                    return Err(LedgerError::NoWithdrawalRequest);
                }
                let ready_at =
                    account.queue_withdrawal_end_ts(self.config.withdrawal_waiting_time_ms);
                if now_ms < ready_at {
                    return Err(LedgerError::NotReadyToWithdraw);
                }
            }
        }

        if !psbt
            .unsigned_tx
            .input
            .iter()
            .all(|input| account.is_deposit_active(&input.previous_output))
        {
            return Err(LedgerError::DepositNotActive);
        }

        let deposit = self
            .deposit(&psbt.unsigned_tx.input[vin].previous_output)
            .ok_or(LedgerError::DepositNotActive)?;
        let custodian = self.custodian_pubkey()?;
        let script = deposit.witness_script(&custodian);
        let sighash = p2wsh_sighash(&psbt.unsigned_tx, vin, &script, deposit.value)?;
        verify_partial_sig(&psbt, vin, user_pubkey, &sighash)?;

        let (reinvest_deposit_vout, reinvest_embed_vout) = match pending {
            Some(pending) => (pending.reinvest_deposit_vout, pending.reinvest_embed_vout),
            None => (
                self.verify_withdrawal_amount(account, &psbt, reinvest_embed_vout)?,
                reinvest_embed_vout,
            ),
        };

        Ok(SignPlan {
            txid: psbt.unsigned_tx.compute_txid(),
            psbt,
            vin,
            sighash,
            reinvest_deposit_vout,
            reinvest_embed_vout,
        })
    }

    /// Value leaving custody must fit in the queue. Returns the reinvest
    /// deposit output, if any.
    fn verify_withdrawal_amount(
        &self,
        account: &Account,
        psbt: &Psbt,
        reinvest_embed_vout: Option<u64>,
    ) -> Result<Option<u64>, LedgerError> {
        let mut inputs_total: u64 = 0;
        for input in &psbt.unsigned_tx.input {
            let deposit = self
                .deposit(&input.previous_output)
                .ok_or(LedgerError::DepositNotActive)?;
            inputs_total = inputs_total.saturating_add(deposit.value.to_sat());
        }

        let (reinvested, reinvest_vout) = match reinvest_embed_vout {
            Some(embed_vout) => {
                let reinvest = self.verify_deposit_txn(&psbt.unsigned_tx, embed_vout)?;
                if reinvest.user_pubkey != account.pubkey {
                    return Err(LedgerError::PsbtReinvestPubkeyMismatch);
                }
                (
                    reinvest.value.to_sat(),
                    Some(u64::from(reinvest.outpoint.vout)),
                )
            }
            None => (0, None),
        };

        let withdrawn = inputs_total.saturating_sub(reinvested);
        if withdrawn > account.queue_withdrawal_amount {
            return Err(LedgerError::WithdrawalExceedsQueue);
        }
        Ok(reinvest_vout)
    }

    fn record_pending_psbt(&mut self, user_pubkey: &PublicKey, plan: &SignPlan) {
        let Some(account) = self.accounts.get_mut(user_pubkey) else {
            return;
        };
        match account.pending_sign_psbt.as_mut() {
            Some(pending) => pending.replace(plan.psbt.clone()),
            None => {
                account.pending_sign_psbt = Some(PendingSignPsbt::new(
                    plan.psbt.clone(),
                    plan.reinvest_deposit_vout,
                    plan.reinvest_embed_vout,
                ))
            }
        }
    }

    /// Note a custodian signature. Clears the queue once every input of the
    /// pending PSBT is signed.
    fn record_signed_input(&mut self, user_pubkey: &PublicKey, txid: Txid, vin: usize) {
        let Some(account) = self.accounts.get_mut(user_pubkey) else {
            return;
        };
        let Some(pending) = account.pending_sign_psbt.as_mut() else {
            log::debug!("Pending PSBT {} dropped while signing", txid);
            return;
        };
        if pending.txid() != txid {
            log::debug!("Pending PSBT replaced while signing {}", txid);
            return;
        }
        pending.signed_inputs.insert(vin as u32);
        let fully_signed = pending.is_fully_signed();
        if fully_signed {
            account.clear_queue();
        }
        self.emit(LedgerEvent::SignWithdrawal {
            user_pubkey: user_pubkey.to_string(),
            tx_id: txid,
            vin: vin as u32,
            fully_signed,
        });
    }

    /// Run every check of [`Ledger::sign_withdrawal`] without recording or
    /// signing anything.
    pub fn dry_run_sign_withdrawal(
        &self,
        psbt_hex: &str,
        user_pubkey: &PublicKey,
        vin: usize,
        reinvest_embed_vout: Option<u64>,
        now_ms: u64,
    ) -> Result<SignPreview, LedgerError> {
        let plan =
            self.prepare_sign_withdrawal(psbt_hex, user_pubkey, vin, reinvest_embed_vout, now_ms)?;
        let replaces_pending = self
            .account(user_pubkey)
            .map_or(false, |a| a.pending_sign_psbt.is_some());
        Ok(SignPreview {
            txid: plan.txid,
            sighash: plan.sighash,
            replaces_pending,
        })
    }
}

impl Ledger {
    /// Validate a withdrawal PSBT and have the custodian sign input `vin`.
    ///
    /// Returns the custodian signature ready for the witness, or `None` when
    /// the signing oracle failed (the attached payment is refunded and the
    /// call can be retried).
    pub async fn sign_withdrawal(
        &mut self,
        ctx: &CallContext,
        psbt_hex: &str,
        user_pubkey: &PublicKey,
        vin: usize,
        reinvest_embed_vout: Option<u64>,
    ) -> Result<Option<ecdsa::Signature>, LedgerError> {
        self.state.assert_running()?;
        let plan = self.state.prepare_sign_withdrawal(
            psbt_hex,
            user_pubkey,
            vin,
            reinvest_embed_vout,
            ctx.timestamp_ms,
        )?;
        self.state.record_pending_psbt(user_pubkey, &plan);
        log::info!(
            "Requesting custodian signature for {} input {}",
            plan.txid,
            plan.vin
        );

        let request = SignRequest {
            payload: plan.sighash.to_byte_array(),
            path: CUSTODIAN_PATH_V1.to_string(),
            key_version: CUSTODIAN_KEY_VERSION_V1,
        };
        let outcome = self.oracles.signer.sign(request).await;
        self.on_sign_withdrawal(ctx, user_pubkey, &plan, outcome)
    }

    fn on_sign_withdrawal(
        &mut self,
        ctx: &CallContext,
        user_pubkey: &PublicKey,
        plan: &SignPlan,
        outcome: SignOutcome,
    ) -> Result<Option<ecdsa::Signature>, LedgerError> {
        let mut signature = match outcome {
            SignOutcome::Signed(signature) => signature,
            SignOutcome::Failed(reason) => {
                log::warn!("Signing {} input {} failed: {}", plan.txid, plan.vin, reason);
                self.state.refund(&ctx.caller, ctx.attached, &reason);
                return Ok(None);
            }
        };
        signature.normalize_s();

        let custodian = self.state.custodian_pubkey()?;
        let secp = Secp256k1::verification_only();
        if secp
            .verify_ecdsa(&sighash_message(&plan.sighash), &signature, &custodian.inner)
            .is_err()
        {
            log::warn!(
                "Signer returned a signature over the wrong payload for {}",
                plan.txid
            );
            self.state
                .refund(&ctx.caller, ctx.attached, "Invalid custodian signature");
            return Ok(None);
        }

        self.state
            .record_signed_input(user_pubkey, plan.txid, plan.vin);
        Ok(Some(ecdsa::Signature::sighash_all(signature)))
    }
}
