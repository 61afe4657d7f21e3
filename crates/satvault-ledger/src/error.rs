//! Ledger errors
//!
//! Every variant renders to a fixed message. Callers branch on these strings,
//! so they must stay stable.

use satvault_script::{EmbedError, ScriptError};
use thiserror::Error;

/// Errors raised by ledger operations. All of them are returned before any
/// state mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // ---- guards ----
    #[error("Ledger is paused")]
    Paused,

    #[error("Not owner")]
    NotOwner,

    #[error("No pending owner")]
    NoPendingOwner,

    #[error("Not pending owner")]
    NotPendingOwner,

    #[error("Invalid operation")]
    InvalidOperation,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Root pubkey already synced")]
    RootPubkeyAlreadySynced,

    #[error("Root pubkey not synced")]
    RootPubkeyNotSynced,

    #[error("Failed to sync root pubkey: {0}")]
    RootPubkeySyncFailed(String),

    #[error("Custodian key derivation failed")]
    KeyDerivation,

    #[error("Not enough payment attached")]
    NotEnoughPayment,

    // ---- malformed input ----
    #[error("Invalid hex transaction")]
    InvalidTxHex,

    #[error("Invalid txn hex")]
    InvalidWithdrawalTxHex,

    #[error("Invalid PSBT hex")]
    InvalidPsbtHex,

    #[error("Bad embed output index")]
    BadEmbedIndex,

    #[error("Bad deposit output index")]
    BadDepositIndex,

    #[error("Bad input index")]
    BadInputIndex,

    #[error("{0}")]
    Embed(#[from] EmbedError),

    #[error("{0}")]
    Script(#[from] ScriptError),

    // ---- deposit policy ----
    #[error("Deposit output is not P2WSH")]
    DepositNotP2wsh,

    #[error("Deposit output bad script hash")]
    DepositBadScriptHash,

    #[error("Invalid seq height. Available values are: {0:?}")]
    InvalidSeqHeight(Vec<u16>),

    #[error("Deposit amount is less than minimum deposit amount")]
    DepositBelowMinimum,

    #[error("Transaction absolute timelock not enabled")]
    AbsoluteTimelockNotEnabled,

    #[error("Transaction locktime should be set to {0}")]
    WrongLocktime(u32),

    #[error("Deposit already saved")]
    DepositAlreadySaved,

    #[error("Deposit already in active set")]
    DepositAlreadyActive,

    #[error("Deposit is not active")]
    DepositNotActive,

    #[error("Deposit already withdrawn")]
    DepositAlreadyWithdrawn,

    // ---- withdrawal requests ----
    #[error("Withdrawal amount must be greater than 0")]
    ZeroWithdrawalAmount,

    #[error("Invalid bitcoin signature")]
    InvalidSignature,

    #[error("BIP322 is not enabled")]
    Bip322NotEnabled,

    #[error("Invalid queue withdrawal amount")]
    InvalidQueueAmount,

    // ---- withdrawal PSBTs ----
    #[error("No withdrawal request made")]
    NoWithdrawalRequest,

    #[error("Not ready to withdraw now")]
    NotReadyToWithdraw,

    #[error("PSBT input length mismatch")]
    PsbtInputLenMismatch,

    #[error("PSBT input mismatch")]
    PsbtInputMismatch,

    #[error("PSBT reinvest output mismatch")]
    PsbtReinvestOutputMismatch,

    #[error("PSBT reinvest pubkey mismatch")]
    PsbtReinvestPubkeyMismatch,

    #[error("Missing partial sig for given input")]
    MissingPartialSig,

    #[error("Invalid partial signature for withdrawal PSBT")]
    InvalidPartialSig,

    #[error("Withdrawal amount is larger than queued amount")]
    WithdrawalExceedsQueue,

    // ---- finalization ----
    #[error("Not a withdrawal transaction")]
    NotWithdrawalTx,

    #[error("Invalid withdrawal witness")]
    InvalidWithdrawalWitness,
}
