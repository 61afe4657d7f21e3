//! Deposit locking script, version 1
//!
//! Every deposit pays to the P2WSH of:
//!
//! ```text
//! OP_IF
//!     <seq> OP_CSV OP_DROP
//!     <user_pk> OP_CHECKSIG
//! OP_ELSE
//!     OP_2 <user_pk> <custodian_pk> OP_2 OP_CHECKMULTISIG
//! OP_ENDIF
//! ```
//!
//! **Solo path** (IF branch, user alone after `seq` blocks):
//!   - Witness: `[<sig_user>, 0x01, <witness_script>]` (3 items)
//!   - The input's nSequence must encode at least `seq` blocks
//!
//! **Cooperative path** (ELSE branch, user + custodian, no delay):
//!   - Witness: `[<empty>, <sig_user>, <sig_custodian>, <empty>, <witness_script>]` (5 items)
//!   - The leading empty item is the CHECKMULTISIG dummy, the empty selector
//!     before the script picks the ELSE branch
//!
//! Signature order in the cooperative witness follows key order in the script.

use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_CSV, OP_DROP, OP_ELSE, OP_ENDIF, OP_IF, OP_PUSHNUM_2,
};
use bitcoin::script::Builder;
use bitcoin::sighash::{EcdsaSighashType, SegwitV0Sighash, SighashCache};
use bitcoin::{ecdsa, Amount, PublicKey, Script, ScriptBuf, Transaction, Witness};
use thiserror::Error;

/// Errors from script-level computations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),

    #[error("Sighash computation failed: {0}")]
    Sighash(String),
}

/// Which branch of the deposit script a witness exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemPath {
    /// User alone, after the relative timelock
    Solo,
    /// 2-of-2 user + custodian
    Cooperative,
    /// Anything else
    Unknown,
}

/// Build the version 1 deposit script.
///
/// The result depends only on its three inputs, so two deposits with the same
/// owner, custodian and timelock share a script. Deposits are told apart by
/// outpoint, never by script.
pub fn build_deposit_script(
    user_pubkey: &PublicKey,
    custodian_pubkey: &PublicKey,
    sequence_height: u16,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_int(sequence_height as i64)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_key(user_pubkey)
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_ELSE)
        .push_opcode(OP_PUSHNUM_2)
        .push_key(user_pubkey)
        .push_key(custodian_pubkey)
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .push_opcode(OP_ENDIF)
        .into_script()
}

/// The P2WSH output script a deposit must pay to.
pub fn deposit_script_pubkey(
    user_pubkey: &PublicKey,
    custodian_pubkey: &PublicKey,
    sequence_height: u16,
) -> ScriptBuf {
    let script = build_deposit_script(user_pubkey, custodian_pubkey, sequence_height);
    ScriptBuf::new_p2wsh(&script.wscript_hash())
}

/// Witness for the solo (timelocked) branch: `[sig, TRUE, script]`.
pub fn build_solo_witness(user_sig: &ecdsa::Signature, witness_script: &Script) -> Witness {
    let mut witness = Witness::new();
    witness.push_ecdsa_signature(user_sig);
    witness.push([1u8]);
    witness.push(witness_script.as_bytes());
    witness
}

/// Witness for the cooperative branch: `[<empty>, user_sig, custodian_sig, FALSE, script]`.
pub fn build_cooperative_witness(
    user_sig: &ecdsa::Signature,
    custodian_sig: &ecdsa::Signature,
    witness_script: &Script,
) -> Witness {
    let mut witness = Witness::new();
    witness.push([0u8; 0]);
    witness.push_ecdsa_signature(user_sig);
    witness.push_ecdsa_signature(custodian_sig);
    witness.push([0u8; 0]);
    witness.push(witness_script.as_bytes());
    witness
}

/// Classify a P2WSH witness by its stack shape.
///
/// Only the two exact shapes produced by [`build_solo_witness`] and
/// [`build_cooperative_witness`] are recognised. The witness script itself is
/// not checked here.
pub fn classify_witness(witness: &Witness) -> RedeemPath {
    let items: Vec<&[u8]> = witness.iter().collect();

    match items.len() {
        3 if items[1] == [1u8] && !items[0].is_empty() => RedeemPath::Solo,
        5 if items[0].is_empty()
            && !items[1].is_empty()
            && !items[2].is_empty()
            && items[3].is_empty() =>
        {
            RedeemPath::Cooperative
        }
        _ => RedeemPath::Unknown,
    }
}

/// BIP143 sighash (SIGHASH_ALL) for spending a P2WSH deposit at `input_index`.
pub fn p2wsh_sighash(
    tx: &Transaction,
    input_index: usize,
    witness_script: &Script,
    value: Amount,
) -> Result<SegwitV0Sighash, ScriptError> {
    if input_index >= tx.input.len() {
        return Err(ScriptError::InputOutOfRange(input_index));
    }
    let mut cache = SighashCache::new(tx);
    cache
        .p2wsh_signature_hash(input_index, witness_script, value, EcdsaSighashType::All)
        .map_err(|e| ScriptError::Sighash(e.to_string()))
}

/// Message digest for a sighash, ready for secp256k1 signing or verification.
pub fn sighash_message(sighash: &SegwitV0Sighash) -> bitcoin::secp256k1::Message {
    bitcoin::secp256k1::Message::from_digest(sighash.to_byte_array())
}
