//! Withdrawal requests
//!
//! A user queues a withdrawal by signing
//! `satvault.withdraw:{nonce}:{amount}sats` with their deposit key, either as
//! a standard Bitcoin signed message or as a BIP322 "full" signature checked
//! by an external verifier. The nonce is consumed by every accepted request.

use crate::error::LedgerError;
use crate::events::LedgerEvent;
use crate::ledger::Ledger;
use crate::state::LedgerState;
use crate::types::{CallContext, SigType, WITHDRAWAL_MSG_PREFIX};
use bitcoin::base64::prelude::{Engine as _, BASE64_STANDARD};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::PublicKey;

/// The exact text a user signs to queue `amount` sats at `nonce`.
pub fn withdrawal_message(nonce: u64, amount: u64) -> String {
    format!("{}:{}:{}sats", WITHDRAWAL_MSG_PREFIX, nonce, amount)
}

/// Verify a Bitcoin signed message (65-byte recoverable signature, hex or
/// base64) against `pubkey`.
pub fn verify_message_signature(
    message: &str,
    signature: &str,
    pubkey: &PublicKey,
) -> Result<(), LedgerError> {
    let sig = parse_message_signature(signature)?;
    let secp = Secp256k1::verification_only();
    let recovered = sig
        .recover_pubkey(&secp, signed_msg_hash(message))
        .map_err(|_| LedgerError::InvalidSignature)?;
    if recovered.inner != pubkey.inner {
        return Err(LedgerError::InvalidSignature);
    }
    Ok(())
}

fn parse_message_signature(signature: &str) -> Result<MessageSignature, LedgerError> {
    let bytes = match hex::decode(signature) {
        Ok(bytes) if bytes.len() == 65 => bytes,
        _ => BASE64_STANDARD
            .decode(signature)
            .map_err(|_| LedgerError::InvalidSignature)?,
    };
    MessageSignature::from_slice(&bytes).map_err(|_| LedgerError::InvalidSignature)
}

impl LedgerState {
    /// Commit a verified request.
    pub(crate) fn queue_withdrawal(
        &mut self,
        user_pubkey: &PublicKey,
        amount: u64,
        now_ms: u64,
    ) -> Result<(), LedgerError> {
        let account = self
            .accounts
            .get_mut(user_pubkey)
            .ok_or(LedgerError::InvalidQueueAmount)?;
        let nonce = account.nonce;
        account.queue_withdrawal(amount, now_ms)?;
        let queued = account.queue_withdrawal_amount;

        log::info!(
            "Queued {} sats for {} (total queued {})",
            amount,
            user_pubkey,
            queued
        );
        self.emit(LedgerEvent::QueueWithdrawal {
            user_pubkey: user_pubkey.to_string(),
            amount,
            nonce,
            queue_withdrawal_amount: queued,
        });
        Ok(())
    }

    fn check_queue_withdrawal(
        &self,
        user_pubkey: &PublicKey,
        amount: u64,
    ) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroWithdrawalAmount);
        }
        let account = self
            .account(user_pubkey)
            .ok_or(LedgerError::InvalidQueueAmount)?;
        account.check_queue_amount(amount)?;
        Ok(account.nonce)
    }
}

impl Ledger {
    /// Queue `amount` sats for withdrawal.
    ///
    /// ECDSA requests complete synchronously. BIP322 requests go through the
    /// verifier and return `Ok(false)` when it rejects the signature.
    pub async fn queue_withdrawal(
        &mut self,
        ctx: &CallContext,
        user_pubkey: &PublicKey,
        amount: u64,
        msg_sig: &str,
        sig_type: SigType,
    ) -> Result<bool, LedgerError> {
        self.state.assert_running()?;
        let nonce = self.state.check_queue_withdrawal(user_pubkey, amount)?;
        let message = withdrawal_message(nonce, amount);

        match sig_type {
            SigType::Ecdsa => {
                verify_message_signature(&message, msg_sig, user_pubkey)?;
                self.state
                    .queue_withdrawal(user_pubkey, amount, ctx.timestamp_ms)?;
                Ok(true)
            }
            SigType::Bip322Full { address } => {
                let verifier = self
                    .oracles
                    .bip322
                    .clone()
                    .ok_or(LedgerError::Bip322NotEnabled)?;
                let valid = verifier
                    .verify_bip322_full(user_pubkey, &address, &message, msg_sig)
                    .await
                    .map_err(|e| {
                        log::warn!("BIP322 verification failed: {}", e);
                        LedgerError::InvalidSignature
                    })?;
                self.on_bip322_verify(ctx, user_pubkey, amount, nonce, valid)
            }
        }
    }

    fn on_bip322_verify(
        &mut self,
        ctx: &CallContext,
        user_pubkey: &PublicKey,
        amount: u64,
        nonce: u64,
        valid: bool,
    ) -> Result<bool, LedgerError> {
        if !valid {
            log::warn!("BIP322 signature rejected for {}", user_pubkey);
            return Ok(false);
        }
        self.state.assert_running()?;
        // another request may have consumed the nonce meanwhile
        if self.state.check_queue_withdrawal(user_pubkey, amount)? != nonce {
            return Err(LedgerError::InvalidSignature);
        }
        self.state
            .queue_withdrawal(user_pubkey, amount, ctx.timestamp_ms)?;
        Ok(true)
    }
}
